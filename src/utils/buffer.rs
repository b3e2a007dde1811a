// -------------------------------------------------------------------------------------------------

/// Multiply all samples of the given buffer with the given factor.
#[inline]
pub fn scale_buffer(buffer: &mut [f32], factor: f32) {
    for s in buffer.iter_mut() {
        *s *= factor;
    }
}

/// Replace all non finite samples (NaN, inf) with zeros.
pub fn sanitize_buffer(buffer: &mut [f32]) {
    for s in buffer.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Copy the given planar stereo buffers into an interleaved one.
/// Copies as many frames as the shortest of the three buffers can hold.
pub fn stereo_to_interleaved(left: &[f32], right: &[f32], interleaved: &mut [f32]) {
    for ((frame, l), r) in interleaved.chunks_exact_mut(2).zip(left).zip(right) {
        frame[0] = *l;
        frame[1] = *r;
    }
}

/// Copy the given interleaved stereo buffer into planar ones.
/// Copies as many frames as the shortest of the three buffers can hold.
pub fn interleaved_to_stereo(interleaved: &[f32], left: &mut [f32], right: &mut [f32]) {
    for ((frame, l), r) in interleaved.chunks_exact(2).zip(left.iter_mut()).zip(right.iter_mut()) {
        *l = frame[0];
        *r = frame[1];
    }
}

/// Mix down planar channels into a single mono buffer. Channels are averaged.
pub fn mixdown_to_mono(channels: &[Vec<f32>], mono: &mut [f32]) {
    mono.fill(0.0);
    if channels.is_empty() {
        return;
    }
    for channel in channels {
        for (m, s) in mono.iter_mut().zip(channel) {
            *m += *s;
        }
    }
    scale_buffer(mono, 1.0 / channels.len() as f32);
}

// -------------------------------------------------------------------------------------------------

use std::{fmt::Debug, ops::RangeInclusive};

use four_cc::FourCC;

use super::{AtomicFloat, Parameter};

// -------------------------------------------------------------------------------------------------

/// A continuous (float) parameter descriptor.
#[derive(Debug, Clone)]
pub struct FloatParameter {
    id: FourCC,
    name: &'static str,
    range: RangeInclusive<f32>,
    default: f32,
    unit: &'static str,
}

impl FloatParameter {
    /// Create a new float parameter descriptor.
    pub fn new(id: FourCC, name: &'static str, range: RangeInclusive<f32>, default: f32) -> Self {
        assert!(
            range.start() < range.end(),
            "Invalid parameter range for '{id}'"
        );
        assert!(
            range.contains(&default),
            "Invalid parameter default value for '{id}'"
        );
        Self {
            id,
            name,
            range,
            default,
            unit: "",
        }
    }

    /// Optional unit for string displays.
    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// The parameter's unique id.
    pub fn id(&self) -> FourCC {
        self.id
    }

    /// The parameter's value range.
    pub fn range(&self) -> &RangeInclusive<f32> {
        &self.range
    }

    /// The parameter's plain default value.
    pub fn default_value(&self) -> f32 {
        self.default
    }

    /// The parameter's display unit, if any.
    pub fn unit(&self) -> &'static str {
        self.unit
    }

    /// Clamp the given plain value to the parameter's range.
    /// NaN values fall back to the parameter's default.
    pub fn clamp_value(&self, value: f32) -> f32 {
        if value.is_nan() {
            self.default
        } else {
            value.clamp(*self.range.start(), *self.range.end())
        }
    }

    /// Normalize the given plain value to a 0.0-1.0 range.
    pub fn normalize_value(&self, value: f32) -> f32 {
        (value - *self.range.start()) / self.span()
    }

    /// Denormalize a 0.0-1.0 ranged value to the corresponding plain value.
    pub fn denormalize_value(&self, normalized: f32) -> f32 {
        *self.range.start() + normalized.clamp(0.0, 1.0) * self.span()
    }

    /// Width of the parameter's value range.
    pub fn span(&self) -> f32 {
        *self.range.end() - *self.range.start()
    }

    /// Convert the given plain value to a string.
    pub fn value_to_string(&self, value: f32, include_unit: bool) -> String {
        if include_unit && !self.unit.is_empty() {
            format!("{:.2} {}", value, self.unit)
        } else {
            format!("{:.2}", value)
        }
    }

    /// Convert the given string to a clamped plain value.
    pub fn string_to_value(&self, string: &str) -> Option<f32> {
        let value = string
            .trim()
            .trim_end_matches(self.unit)
            .trim()
            .parse::<f32>()
            .ok()?;
        Some(self.clamp_value(value))
    }
}

impl Parameter for FloatParameter {
    fn id(&self) -> FourCC {
        self.id
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn default_value(&self) -> f32 {
        self.normalize_value(self.default)
    }

    fn normalized_value_to_string(&self, normalized: f32, include_unit: bool) -> String {
        self.value_to_string(self.denormalize_value(normalized), include_unit)
    }

    fn string_to_normalized_value(&self, string: String) -> Option<f32> {
        let value = self.string_to_value(&string)?;
        Some(self.normalize_value(value))
    }
}

// -------------------------------------------------------------------------------------------------

/// A float parameter description together with its current, atomically shared value.
///
/// Setters clamp into the description's range, so readers on the audio thread can use the
/// value without further checks.
#[derive(Debug)]
pub struct SharedFloatParameter {
    description: FloatParameter,
    value: AtomicFloat,
}

impl SharedFloatParameter {
    /// Create a new shared value, initialized to the description's default value.
    pub fn from_description(description: FloatParameter) -> Self {
        let value = AtomicFloat::new(description.default_value());
        Self { description, value }
    }

    /// Access the parameter value's description.
    pub fn description(&self) -> &FloatParameter {
        &self.description
    }

    /// Current plain value.
    #[inline]
    pub fn value(&self) -> f32 {
        self.value.load()
    }

    /// Set a new plain value, clamped into the parameter's range.
    /// Returns the value that actually got stored.
    pub fn set_value(&self, value: f32) -> f32 {
        let clamped = self.description.clamp_value(value);
        if clamped != value {
            log::debug!(
                "Clamped value {value} of parameter '{}' to {clamped}",
                self.description.id()
            );
        }
        self.value.store(clamped);
        clamped
    }

    /// Set a new value in range 0.0..=1.0.
    pub fn set_normalized_value(&self, normalized: f32) -> f32 {
        self.set_value(self.description.denormalize_value(normalized))
    }

    /// Reset the value to the description's default.
    pub fn reset(&self) {
        self.value.store(self.description.default_value());
    }
}

// -------------------------------------------------------------------------------------------------

use four_cc::FourCC;
use rand::{rngs::SmallRng, SeedableRng};

use crate::Error;

use super::{ImageModulationData, ModulationSource, ModulationTarget};

// -------------------------------------------------------------------------------------------------

/// A single routing from a modulation source to a target parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModulationRoute {
    /// Index of the source in the [`ModulationMatrix`].
    pub source: usize,
    /// Target parameter id.
    pub target: FourCC,
    /// Bipolar depth: a depth of 1 sweeps the target's full range.
    pub depth: f32,
}

impl ModulationRoute {
    pub fn new(source: usize, target: FourCC, depth: f32) -> Self {
        Self {
            source,
            target,
            depth,
        }
    }
}

// -------------------------------------------------------------------------------------------------

/// Holds all modulation sources, their routes to target parameters and the most recent image
/// analysis data which image sources read from.
///
/// Sources get evaluated once per block with [`Self::process`]; [`Self::offset`] then sums up
/// the scaled values of all routes to a target. Sources, targets and routes are set up before
/// processing: route updates while processing never allocate and get rejected when the
/// preallocated route capacity is exhausted.
#[derive(Debug, Clone)]
pub struct ModulationMatrix {
    sources: Vec<ModulationSource>,
    values: Vec<f32>,
    targets: Vec<ModulationTarget>,
    routes: Vec<ModulationRoute>,
    image: ImageModulationData,
    rng: SmallRng,
    sample_rate: u32,
}

impl ModulationMatrix {
    /// Max number of routes a matrix can hold.
    pub const MAX_ROUTES: usize = 64;

    /// Routes with a smaller absolute depth get removed.
    const DEPTH_THRESHOLD: f32 = 0.001;

    /// Create a new, empty modulation matrix. The seed is used by random sources.
    pub fn new(seed: u64) -> Self {
        Self {
            sources: Vec::new(),
            values: Vec::new(),
            targets: Vec::new(),
            routes: Vec::with_capacity(Self::MAX_ROUTES),
            image: ImageModulationData::default(),
            rng: SmallRng::seed_from_u64(seed),
            sample_rate: 44100,
        }
    }

    /// Add a new source and return its index.
    pub fn add_source(&mut self, source: ModulationSource) -> usize {
        self.sources.push(source);
        self.values.push(0.0);
        self.sources.len() - 1
    }

    pub fn sources(&self) -> &[ModulationSource] {
        &self.sources
    }

    /// Mutable access to a source, e.g. to change its settings.
    pub fn source_mut(&mut self, index: usize) -> Option<&mut ModulationSource> {
        self.sources.get_mut(index)
    }

    /// Register a parameter which routes can target.
    pub fn add_target(&mut self, target: ModulationTarget) {
        if !self.targets.iter().any(|t| t.id() == target.id()) {
            self.targets.push(target);
        }
    }

    pub fn targets(&self) -> &[ModulationTarget] {
        &self.targets
    }

    pub fn routes(&self) -> &[ModulationRoute] {
        &self.routes
    }

    /// Add a new route. Fails when the source or target is unknown or the matrix is full.
    pub fn add_route(&mut self, route: ModulationRoute) -> Result<(), Error> {
        self.validate_route(route.source, route.target)?;
        if self.routes.len() >= Self::MAX_ROUTES {
            return Err(Error::ParameterError(format!(
                "Modulation matrix can't hold more than {} routes",
                Self::MAX_ROUTES
            )));
        }
        self.routes.push(route);
        Ok(())
    }

    /// Set the depth of the route from `source` to `target`. Adds a new route if there is none
    /// yet and removes the route when depth is zero. Returns false when the route is invalid or
    /// when there's no room left for a new one.
    pub fn update_route(&mut self, source: usize, target: FourCC, depth: f32) -> bool {
        if self.validate_route(source, target).is_err() {
            return false;
        }
        let remove = depth.abs() < Self::DEPTH_THRESHOLD || depth.is_nan();
        if let Some(index) = self
            .routes
            .iter()
            .position(|r| r.source == source && r.target == target)
        {
            if remove {
                self.routes.swap_remove(index);
            } else {
                self.routes[index].depth = depth;
            }
            true
        } else if remove {
            true
        } else if self.routes.len() < Self::MAX_ROUTES {
            self.routes.push(ModulationRoute::new(source, target, depth));
            true
        } else {
            false
        }
    }

    /// Remove all routes.
    pub fn clear_routes(&mut self) {
        self.routes.clear();
    }

    /// Latch new image analysis data for image sources.
    pub fn set_image_data(&mut self, data: ImageModulationData) {
        self.image = data;
    }

    pub fn image_data(&self) -> &ImageModulationData {
        &self.image
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Evaluate all sources for the next block of frames.
    pub fn process(&mut self, frames: usize) {
        for (source, value) in self.sources.iter_mut().zip(self.values.iter_mut()) {
            *value = source.evaluate(self.sample_rate, frames, &self.image, &mut self.rng);
        }
    }

    /// Value of the given source from the last [`Self::process`] call.
    pub fn value(&self, source: usize) -> f32 {
        self.values.get(source).copied().unwrap_or(0.0)
    }

    /// Sum of all routed source values for the given target, in the target's plain units.
    pub fn offset(&self, target: FourCC) -> f32 {
        let Some(span) = self
            .targets
            .iter()
            .find(|t| t.id() == target)
            .map(|t| t.span())
        else {
            return 0.0;
        };
        self.routes
            .iter()
            .filter(|route| route.target == target)
            .map(|route| route.depth * self.value(route.source))
            .sum::<f32>()
            * span
    }

    /// Reset all sources and values.
    pub fn reset(&mut self) {
        for source in &mut self.sources {
            source.reset();
        }
        self.values.fill(0.0);
    }

    fn validate_route(&self, source: usize, target: FourCC) -> Result<(), Error> {
        if source >= self.sources.len() {
            return Err(Error::ParameterError(format!(
                "Invalid modulation source index: {source}"
            )));
        }
        if !self.targets.iter().any(|t| t.id() == target) {
            return Err(Error::ParameterError(format!(
                "Invalid modulation target: '{target}'"
            )));
        }
        Ok(())
    }
}

impl Default for ModulationMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

// -------------------------------------------------------------------------------------------------

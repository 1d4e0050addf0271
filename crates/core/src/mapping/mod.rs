use std::time::Duration;

use crate::{
    analysis::AudioBands,
    presets::{AudioResponse, Preset, UniformDecl},
    shader::UniformValue,
};

/// Uniform fed with the elapsed loop time in seconds.
pub const TIME_UNIFORM: &str = "time";

/// The three band-driven uniforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioBand {
    Bass,
    Mid,
    High,
}

impl AudioBand {
    pub const ALL: [AudioBand; 3] = [AudioBand::Bass, AudioBand::Mid, AudioBand::High];

    pub fn uniform_name(self) -> &'static str {
        match self {
            AudioBand::Bass => "bass",
            AudioBand::Mid => "mid",
            AudioBand::High => "high",
        }
    }

    pub fn from_uniform(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|band| band.uniform_name() == name)
    }

    fn level(self, bands: &AudioBands) -> f32 {
        match self {
            AudioBand::Bass => bands.bass,
            AudioBand::Mid => bands.mid,
            AudioBand::High => bands.high,
        }
    }

    fn sensitivity(self, response: &AudioResponse) -> f32 {
        match self {
            AudioBand::Bass => response.bass_sensitivity,
            AudioBand::Mid => response.mid_sensitivity,
            AudioBand::High => response.high_sensitivity,
        }
    }
}

/// Concrete value routed to one named uniform.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub target: String,
    pub value: UniformValue,
}

/// Per-frame uniform values derived from a preset, the current bands and
/// the loop clock. The buffer is reused between frames.
#[derive(Debug, Default, Clone)]
pub struct MappingMatrix {
    updates: Vec<ParameterUpdate>,
}

impl MappingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.updates.clear();
    }

    pub fn updates(&self) -> &[ParameterUpdate] {
        &self.updates
    }

    /// Recomputes one update per declared uniform.
    ///
    /// Scalar `bass`/`mid`/`high` become `band * sensitivity`, clamped to the
    /// declared range, and replace the declared default outright. A scalar
    /// `time` becomes `elapsed` in seconds. Everything else keeps its
    /// declared default.
    pub fn evaluate(
        &mut self,
        preset: &Preset,
        bands: &AudioBands,
        elapsed: Duration,
    ) -> &[ParameterUpdate] {
        self.clear();
        for (name, decl) in &preset.uniforms {
            let value = derive_value(name, decl, preset, bands, elapsed);
            self.updates.push(ParameterUpdate {
                target: name.clone(),
                value,
            });
        }
        &self.updates
    }
}

fn derive_value(
    name: &str,
    decl: &UniformDecl,
    preset: &Preset,
    bands: &AudioBands,
    elapsed: Duration,
) -> UniformValue {
    if decl.value.as_scalar().is_none() {
        return decl.value;
    }
    if let Some(band) = AudioBand::from_uniform(name) {
        let raw = band.level(bands) * band.sensitivity(&preset.audio_responsive);
        return UniformValue::Scalar(decl.clamp(raw));
    }
    if name == TIME_UNIFORM {
        return UniformValue::Scalar(elapsed.as_secs_f32());
    }
    decl.value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::builtin_presets;

    fn bass_gradient() -> Preset {
        builtin_presets()
            .into_iter()
            .find(|preset| preset.id == "bass-gradient")
            .unwrap()
    }

    fn value_of(updates: &[ParameterUpdate], name: &str) -> UniformValue {
        updates
            .iter()
            .find(|update| update.target == name)
            .map(|update| update.value)
            .unwrap()
    }

    #[test]
    fn bands_scale_by_sensitivity() {
        let mut matrix = MappingMatrix::new();
        let bands = AudioBands {
            bass: 200.0,
            mid: 100.0,
            high: 50.0,
        };
        let updates = matrix.evaluate(&bass_gradient(), &bands, Duration::from_millis(1500));

        assert_eq!(updates.len(), 4);
        assert_eq!(value_of(updates, "bass"), UniformValue::Scalar(200.0));
        assert_eq!(value_of(updates, "mid"), UniformValue::Scalar(50.0));
        let high = value_of(updates, "high").as_scalar().unwrap();
        assert!((high - 15.0).abs() < 1e-4, "{high}");
        assert_eq!(value_of(updates, "time"), UniformValue::Scalar(1.5));
    }

    #[test]
    fn audio_values_clamp_to_declared_range() {
        let mut preset = bass_gradient();
        preset.audio_responsive = AudioResponse::new(4.0, 1.0, 1.0);
        preset.uniforms.insert(
            "mid".into(),
            UniformDecl::new(UniformValue::Scalar(10.0)),
        );
        let bands = AudioBands {
            bass: 200.0,
            mid: 200.0,
            high: 0.0,
        };

        let mut matrix = MappingMatrix::new();
        let updates = matrix.evaluate(&preset, &bands, Duration::ZERO);
        assert_eq!(value_of(updates, "bass"), UniformValue::Scalar(255.0));
        // No declared range, so no clamp, and the default of 10 is replaced.
        assert_eq!(value_of(updates, "mid"), UniformValue::Scalar(200.0));
    }

    #[test]
    fn non_audio_uniforms_keep_defaults() {
        let mut preset = bass_gradient();
        preset.uniforms.insert(
            "tint".into(),
            UniformDecl::new(UniformValue::Vec3([0.1, 0.2, 0.3])),
        );
        preset.uniforms.insert(
            "bass".into(),
            UniformDecl::new(UniformValue::Vec2([1.0, 2.0])),
        );

        let mut matrix = MappingMatrix::new();
        let updates = matrix.evaluate(&preset, &AudioBands::SILENT, Duration::ZERO);
        assert_eq!(value_of(updates, "tint"), UniformValue::Vec3([0.1, 0.2, 0.3]));
        assert_eq!(value_of(updates, "bass"), UniformValue::Vec2([1.0, 2.0]));
    }

    #[test]
    fn silence_maps_to_zero() {
        let mut matrix = MappingMatrix::new();
        let updates = matrix.evaluate(&bass_gradient(), &AudioBands::SILENT, Duration::ZERO);
        for band in AudioBand::ALL {
            assert_eq!(value_of(updates, band.uniform_name()), UniformValue::Scalar(0.0));
        }
    }
}

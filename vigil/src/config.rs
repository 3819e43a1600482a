//! # Trigger configuration
//!
//! Serializable descriptions of triggers. Every field has a default, so a configuration only
//! needs to name what differs. Parameter overrides are type checked against the declared
//! parameters when the trigger is built.

use crate::params::{
    cascade_defaults, motion_defaults, DESPECKLE_FILTER, MAX_FPS, PRE_RECORD_DURATION,
};
use crate::prelude::v1::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// External detector plugin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Path to the shared library.
    pub file: String,
    /// Parameter string passed to the plugin.
    pub parameter: String,
}

/// Frame differencing motion trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    pub id: String,
    pub descr: String,
    /// Frames to skip before detection starts.
    pub warm_up: usize,
    /// Script run when a recording starts.
    pub exec_start: String,
    /// Script run when a recording stops.
    pub exec_end: String,
    /// Image file selecting the pixels that are analysed.
    pub selection_bitmap: Option<String>,
    pub plugin: Option<PluginConfig>,
    /// Overrides of the default parameters.
    pub parameters: BTreeMap<String, Value>,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            id: "motion".into(),
            descr: String::new(),
            warm_up: 10,
            exec_start: String::new(),
            exec_end: String::new(),
            selection_bitmap: None,
            plugin: None,
            parameters: BTreeMap::new(),
        }
    }
}

impl TriggerConfig {
    /// Default parameters with the configured overrides applied.
    pub fn build_parameters(&self) -> Result<ParameterSet> {
        let params = motion_defaults();

        params
            .apply_overrides(&self.parameters)
            .with_context(|| format!("invalid parameters for trigger {}", self.id))?;

        if params.get_double(MAX_FPS) == 0.0 {
            bail!("{}: max-fps must not be 0 (use -1 for unlimited)", self.id);
        }

        crate::despeckle::validate_pattern(&params.get_string(DESPECKLE_FILTER))
            .with_context(|| format!("invalid despeckle filter for trigger {}", self.id))?;

        Ok(params)
    }

    /// Create the detector, loading the selection mask and plugin if configured.
    pub fn build_detector(&self) -> Result<MotionDetector> {
        let detector = match &self.plugin {
            None => MotionDetector::builtin(),
            #[cfg(feature = "plugins")]
            Some(plugin) => MotionDetector::external(crate::plugins::ExternalDetector::load(
                &plugin.file,
                &plugin.parameter,
            )?),
            #[cfg(not(feature = "plugins"))]
            Some(plugin) => bail!(
                "{}: cannot load {}, plugin support is disabled",
                self.id,
                plugin.file
            ),
        };

        Ok(match &self.selection_bitmap {
            Some(path) => detector.with_mask(SelectionMask::load(path)?),
            None => detector,
        })
    }

    /// Create the trigger.
    pub fn build(
        &self,
        source: Arc<dyn Source>,
        event_log: Arc<dyn EventLog>,
        meta: Arc<dyn MetaStore>,
    ) -> Result<MotionTrigger> {
        let params = Arc::new(self.build_parameters()?);
        let detector = self.build_detector()?;

        Ok(
            MotionTrigger::new(&self.id, source, params, detector, event_log, meta)
                .with_warm_up(self.warm_up)
                .with_scripts(Arc::new(ShellRunner), &self.exec_start, &self.exec_end),
        )
    }
}

/// Trigger following other triggers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CascadeConfig {
    pub id: String,
    pub descr: String,
    pub pre_motion_record_duration: i64,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            id: "cascade".into(),
            descr: String::new(),
            pre_motion_record_duration: 0,
        }
    }
}

impl CascadeConfig {
    pub fn build_parameters(&self) -> Result<ParameterSet> {
        let params = cascade_defaults();
        params.set(PRE_RECORD_DURATION, self.pre_motion_record_duration)?;
        Ok(params)
    }

    /// Create the trigger, following `upstream`.
    pub fn build(
        &self,
        source: Arc<dyn Source>,
        upstream: &[TriggerLink],
    ) -> Result<CascadingTrigger> {
        if upstream.is_empty() {
            bail!("{}: cascading trigger without upstream triggers", self.id);
        }

        let params = Arc::new(self.build_parameters()?);

        Ok(CascadingTrigger::new(&self.id, source, params, upstream))
    }
}

/// Audio level trigger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioTriggerConfig {
    pub id: String,
    pub descr: String,
    pub threshold: u16,
    pub min_n_triggers: usize,
}

impl Default for AudioTriggerConfig {
    fn default() -> Self {
        Self {
            id: "audio".into(),
            descr: String::new(),
            threshold: 1000,
            min_n_triggers: 5,
        }
    }
}

impl AudioTriggerConfig {
    pub fn build(&self, source: Box<dyn AudioSource>) -> AudioTrigger {
        AudioTrigger::new(&self.id, source, self.threshold, self.min_n_triggers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{MIN_PIXELS_CHANGED, NOISE_FACTOR};
    use crate::testing::*;

    #[test]
    fn overrides_defaults() {
        let mut cfg = TriggerConfig::default();
        cfg.parameters.insert(NOISE_FACTOR.into(), Value::Int(10));
        cfg.parameters.insert(MIN_PIXELS_CHANGED.into(), Value::Int(2));

        let params = cfg.build_parameters().unwrap();
        assert_eq!(params.get_int(NOISE_FACTOR), 10);
        assert_eq!(params.get_double(MIN_PIXELS_CHANGED), 2.0);
        assert_eq!(params.get_int(PRE_RECORD_DURATION), 10);
    }

    #[test]
    fn rejects_bad_parameters() {
        let mut cfg = TriggerConfig::default();
        cfg.parameters
            .insert(NOISE_FACTOR.into(), Value::String("lots".into()));
        assert!(cfg.build_parameters().is_err());

        let mut cfg = TriggerConfig::default();
        cfg.parameters.insert("bogus".into(), Value::Int(1));
        assert!(cfg.build_parameters().is_err());

        let mut cfg = TriggerConfig::default();
        cfg.parameters.insert(MAX_FPS.into(), Value::Double(0.0));
        assert!(cfg.build_parameters().is_err());

        let mut cfg = TriggerConfig::default();
        cfg.parameters
            .insert(DESPECKLE_FILTER.into(), Value::String("dx".into()));
        assert!(cfg.build_parameters().is_err());
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: TriggerConfig = serde_json::from_str(
            r#"{
                "id": "front",
                "parameters": {
                    "noise-factor": 20,
                    "pan-tilt": true,
                    "despeckle-filter": "EeDd"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.id, "front");
        assert_eq!(cfg.warm_up, 10);
        assert_eq!(cfg.plugin, None);

        let params = cfg.build_parameters().unwrap();
        assert_eq!(params.get_int(NOISE_FACTOR), 20);
        assert!(params.get_bool(crate::params::PAN_TILT));
        assert_eq!(params.get_string(DESPECKLE_FILTER), "EeDd");
    }

    #[test]
    fn missing_files_fail_the_build() {
        let cfg = TriggerConfig {
            selection_bitmap: Some("/nonexistent/vigil/mask.png".into()),
            ..Default::default()
        };
        assert!(cfg.build_detector().is_err());

        let cfg = TriggerConfig {
            plugin: Some(PluginConfig {
                file: "/nonexistent/vigil/plugin.so".into(),
                parameter: String::new(),
            }),
            ..Default::default()
        };
        assert!(cfg.build_detector().is_err());
    }

    #[test]
    fn builds_cascade() {
        let cfg = CascadeConfig {
            pre_motion_record_duration: 4,
            ..Default::default()
        };
        assert_eq!(
            cfg.build_parameters().unwrap().get_int(PRE_RECORD_DURATION),
            4
        );

        let source = ScriptedSource::new([]);
        assert!(cfg.build(source.clone(), &[]).is_err());
        assert!(cfg.build(source, &[TriggerLink::new("lores")]).is_ok());
    }
}

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::FeatureError;

/// Value written for window offsets that fall outside a video.
///
/// Scores are probabilities in `[0, 1]`, so the sentinel never collides with a real value.
pub const MISSING_SENTINEL: f32 = -1.0;

/// Channel layout of a single Score Source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Stable source name, used as the column prefix.
    pub name: String,
    /// Number of score channels per frame.
    pub channels: usize,
    /// Index of the "no-object" channel within the score vector.
    pub no_object_channel: usize,
    /// Optional per-channel names (defaults to `c0..cN`).
    #[serde(default)]
    pub channel_names: Option<Vec<String>>,
}

impl SourceSpec {
    pub fn new(name: impl Into<String>, channels: usize, no_object_channel: usize) -> Self {
        Self {
            name: name.into(),
            channels,
            no_object_channel,
            channel_names: None,
        }
    }

    pub fn validate(&self) -> Result<(), FeatureError> {
        if self.no_object_channel >= self.channels {
            return Err(FeatureError::InvalidNoObjectChannel {
                source_name: self.name.clone(),
                channel: self.no_object_channel,
                channels: self.channels,
            });
        }
        if let Some(names) = &self.channel_names
            && names.len() != self.channels
        {
            return Err(FeatureError::ChannelNameCount {
                source_name: self.name.clone(),
                expected: self.channels,
                found: names.len(),
            });
        }
        Ok(())
    }

    fn channel_name(&self, idx: usize) -> String {
        match &self.channel_names {
            Some(names) => names[idx].clone(),
            None => format!("c{idx}"),
        }
    }
}

/// Window radius around the current frame for the "no-object" channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowSpec {
    /// Number of preceding frames.
    pub backward: usize,
    /// Number of following frames.
    pub forward: usize,
    /// Treat a source whose frame count differs from the declared video length as fatal.
    pub strict_frame_counts: bool,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self {
            backward: 7,
            forward: 7,
            strict_frame_counts: true,
        }
    }
}

impl WindowSpec {
    pub fn symmetric(radius: usize) -> Self {
        Self {
            backward: radius,
            forward: radius,
            ..Self::default()
        }
    }
}

/// Frozen description of every window column, in output order.
///
/// Per source the layout is: every score channel, the current frame's no-object
/// score, then `prev_1..prev_B` and `next_1..next_F`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    sources: Vec<SourceSpec>,
    window: WindowSpec,
}

impl FeatureSet {
    pub fn new(sources: Vec<SourceSpec>, window: WindowSpec) -> Result<Self, FeatureError> {
        if sources.is_empty() {
            return Err(FeatureError::NoSources);
        }
        let mut names = BTreeSet::new();
        for source in &sources {
            source.validate()?;
            if !names.insert(source.name.as_str()) {
                return Err(FeatureError::DuplicateSource(source.name.clone()));
            }
        }
        Ok(Self { sources, window })
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn window(&self) -> WindowSpec {
        self.window
    }

    /// Columns contributed by one source: `channels + 1 + backward + forward`.
    pub fn source_width(&self, source: &SourceSpec) -> usize {
        source.channels + 1 + self.window.backward + self.window.forward
    }

    /// Total row width across all sources.
    pub fn width(&self) -> usize {
        self.sources.iter().map(|s| self.source_width(s)).sum()
    }

    /// Ordered column names matching the values written by the window builder.
    pub fn columns(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.width());
        for source in &self.sources {
            let name = &source.name;
            for idx in 0..source.channels {
                out.push(format!("{name}_{}", source.channel_name(idx)));
            }
            out.push(format!("{name}_no_object"));
            for j in 1..=self.window.backward {
                out.push(format!("{name}_no_object_prev_{j}"));
            }
            for j in 1..=self.window.forward {
                out.push(format!("{name}_no_object_next_{j}"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_sources() -> Vec<SourceSpec> {
        ["densenet121", "resnet50", "inception_v3"]
            .into_iter()
            .map(|name| SourceSpec::new(name, 8, 7))
            .collect()
    }

    #[test]
    fn width_matches_layout() {
        let set = FeatureSet::new(three_sources(), WindowSpec::symmetric(2)).unwrap();
        assert_eq!(set.width(), (8 + 1 + 4) * 3);
        assert_eq!(set.columns().len(), set.width());
    }

    #[test]
    fn columns_follow_source_order() {
        let set = FeatureSet::new(three_sources(), WindowSpec::symmetric(1)).unwrap();
        let columns = set.columns();
        assert_eq!(columns[0], "densenet121_c0");
        assert_eq!(columns[8], "densenet121_no_object");
        assert_eq!(columns[9], "densenet121_no_object_prev_1");
        assert_eq!(columns[10], "densenet121_no_object_next_1");
        assert_eq!(columns[11], "resnet50_c0");
    }

    #[test]
    fn asymmetric_window_counts_each_side() {
        let window = WindowSpec {
            backward: 3,
            forward: 1,
            ..WindowSpec::default()
        };
        let set = FeatureSet::new(vec![SourceSpec::new("a", 4, 3)], window).unwrap();
        assert_eq!(set.width(), 4 + 1 + 3 + 1);
    }

    #[test]
    fn rejects_no_object_channel_out_of_range() {
        let err = FeatureSet::new(vec![SourceSpec::new("a", 4, 4)], WindowSpec::default());
        assert!(matches!(err, Err(FeatureError::InvalidNoObjectChannel { .. })));
    }

    #[test]
    fn rejects_duplicate_sources() {
        let sources = vec![SourceSpec::new("a", 2, 1), SourceSpec::new("a", 2, 1)];
        let err = FeatureSet::new(sources, WindowSpec::default());
        assert!(matches!(err, Err(FeatureError::DuplicateSource(name)) if name == "a"));
    }

    #[test]
    fn custom_channel_names_are_used() {
        let mut spec = SourceSpec::new("net", 2, 1);
        spec.channel_names = Some(vec!["species_a".into(), "no_fish".into()]);
        let set = FeatureSet::new(vec![spec], WindowSpec::symmetric(0)).unwrap();
        assert_eq!(
            set.columns(),
            vec!["net_species_a", "net_no_fish", "net_no_object"]
        );
    }
}

//! Training metrics snapshots and the delegate log-line parser.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Phase of a training run an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// An epoch began.
    EpochStart,
    /// Training-set metrics.
    Training,
    /// Validation-set metrics.
    Validation,
    /// End-of-epoch bookkeeping such as best-model checkpoints.
    EpochEnd,
    /// The run finished.
    Completed,
}

macro_rules! metrics_snapshot {
    (
        counters { $($cname:ident),* $(,)? }
        values { $($vname:ident $(=> $rename:literal)?),* $(,)? }
    ) => {
        /// Optional numeric metrics for one task.
        ///
        /// Absent fields are omitted on the wire. [`MetricsSnapshot::merge`]
        /// overwrites with present incoming fields and keeps the rest.
        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct MetricsSnapshot {
            $(
                #[allow(missing_docs)]
                #[serde(default, skip_serializing_if = "Option::is_none")]
                pub $cname: Option<u32>,
            )*
            $(
                #[allow(missing_docs)]
                #[serde(default, skip_serializing_if = "Option::is_none")]
                $(#[serde(rename = $rename)])?
                pub $vname: Option<f64>,
            )*
        }

        impl MetricsSnapshot {
            /// Field-wise merge: present fields in `other` win.
            pub fn merge(&mut self, other: &Self) {
                $( if other.$cname.is_some() { self.$cname = other.$cname; } )*
                $( if other.$vname.is_some() { self.$vname = other.$vname; } )*
            }

            /// Whether no field is set.
            #[must_use]
            pub const fn is_empty(&self) -> bool {
                $( self.$cname.is_none() && )*
                $( self.$vname.is_none() && )*
                true
            }

            /// Present fields as a name-to-number map, using wire names.
            #[must_use]
            pub fn to_map(&self) -> BTreeMap<String, f64> {
                let mut map = BTreeMap::new();
                $(
                    if let Some(v) = self.$cname {
                        map.insert(stringify!($cname).to_string(), f64::from(v));
                    }
                )*
                $(
                    if let Some(v) = self.$vname {
                        map.insert(metrics_snapshot!(@name $vname $($rename)?).to_string(), v);
                    }
                )*
                map
            }
        }
    };
    (@name $vname:ident $rename:literal) => { $rename };
    (@name $vname:ident) => { stringify!($vname) };
}

metrics_snapshot! {
    counters { epoch, total_epochs }
    values {
        train_loss,
        train_acc,
        val_loss,
        val_acc,
        macro_f1,
        micro_f1,
        macro_precision,
        macro_recall,
        micro_precision,
        micro_recall,
        precision,
        recall,
        map => "mAP",
        top1_acc,
        top3_acc,
        top5_acc,
        learning_rate,
        best_acc,
    }
}

static EPOCH_STARTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Epoch \[(\d+)/(\d+)\] started").expect("valid regex"));
static TRAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Train Loss: ([\d.]+), Train Accuracy: ([\d.]+)%").expect("valid regex")
});
static VALIDATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Validation Loss: ([\d.]+), Validation Accuracy: ([\d.]+)%").expect("valid regex")
});
static VALIDATION_SCALAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Validation (macro_F1|micro_F1|macro_precision|macro_recall|micro_precision|micro_recall|mAP): ([\d.]+)",
    )
    .expect("valid regex")
});
static TOP_K: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Validation Top-k Accuracy: \{'top1': ([\d.]+), 'top3': ([\d.]+), 'top5': ([\d.]+)\}",
    )
    .expect("valid regex")
});
static LEARNING_RATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)learning rate: ([\d.eE+-]+)").expect("valid regex"));
static BEST_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"New best model saved with Accuracy: ([\d.]+)%").expect("valid regex")
});

const COMPLETION_MARKERS: [&str; 2] = ["Training completed", "训练完成"];

/// Structured data recognised in one delegate line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedLine {
    /// Metrics found on the line, stamped with the current epoch counters.
    pub metrics: Option<MetricsSnapshot>,
    /// Stage the line belongs to.
    pub stage: Option<Stage>,
}

/// Scrapes metrics from free-form delegate output.
///
/// Remembers the last `Epoch [n/N] started` so every later hit carries
/// `epoch` and `total_epochs`. Unrecognised lines parse to nothing.
#[derive(Debug, Clone, Default)]
pub struct LogLineParser {
    current_epoch: Option<u32>,
    total_epochs: Option<u32>,
}

fn num(s: &str) -> Option<f64> {
    s.parse().ok()
}

impl LogLineParser {
    /// Fresh parser with no epoch state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Epoch counters seen so far.
    #[must_use]
    pub const fn epochs(&self) -> (Option<u32>, Option<u32>) {
        (self.current_epoch, self.total_epochs)
    }

    /// Parse one line.
    pub fn parse(&mut self, line: &str) -> ParsedLine {
        let mut m = MetricsSnapshot::default();
        let stage = if let Some(c) = EPOCH_STARTED.captures(line) {
            self.current_epoch = c[1].parse().ok();
            self.total_epochs = c[2].parse().ok();
            Some(Stage::EpochStart)
        } else if let Some(c) = TRAIN.captures(line) {
            m.train_loss = num(&c[1]);
            m.train_acc = num(&c[2]);
            Some(Stage::Training)
        } else if let Some(c) = VALIDATION.captures(line) {
            m.val_loss = num(&c[1]);
            m.val_acc = num(&c[2]);
            Some(Stage::Validation)
        } else if let Some(c) = VALIDATION_SCALAR.captures(line) {
            let v = num(&c[2]);
            match &c[1] {
                "macro_F1" => m.macro_f1 = v,
                "micro_F1" => m.micro_f1 = v,
                "macro_precision" => m.macro_precision = v,
                "macro_recall" => m.macro_recall = v,
                "micro_precision" => m.micro_precision = v,
                "micro_recall" => m.micro_recall = v,
                _ => m.map = v,
            }
            Some(Stage::Validation)
        } else if let Some(c) = TOP_K.captures(line) {
            m.top1_acc = num(&c[1]);
            m.top3_acc = num(&c[2]);
            m.top5_acc = num(&c[3]);
            Some(Stage::Validation)
        } else if let Some(c) = BEST_MODEL.captures(line) {
            m.best_acc = num(&c[1]);
            Some(Stage::EpochEnd)
        } else if let Some(c) = LEARNING_RATE.captures(line) {
            m.learning_rate = num(&c[1]);
            Some(Stage::Training)
        } else if COMPLETION_MARKERS.iter().any(|marker| line.contains(marker)) {
            Some(Stage::Completed)
        } else {
            None
        };

        if stage == Some(Stage::EpochStart) || !m.is_empty() {
            m.epoch = self.current_epoch;
            m.total_epochs = self.total_epochs;
        }
        ParsedLine {
            metrics: (!m.is_empty()).then_some(m),
            stage,
        }
    }
}

//! Query integrity watermark.
//!
//! A query result is guaranteed complete only once a full aggregator cycle
//! has both started after the last metadata store rebuild and finished. The
//! aggregator's `super_cycle_start` marks a finished boundary because the next
//! cycle's start is only recorded after the previous one closed. The saved
//! copy lets the guarantee survive a restart until a newer rebuild
//! invalidates it.

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::store::{ConfigStore, KEY_SAVED_QUERY_INTEGRITY_TIME};

/// Inputs of one watermark evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkInputs {
    /// Aggregator run start.
    pub super_run_start: i64,
    /// Aggregator cycle start.
    pub super_cycle_start: i64,
    /// Time of the last metadata store rebuild.
    pub metadata_rebuild_time: i64,
    /// Currently persisted watermark.
    pub saved_query_integrity_time: i64,
}

/// Outcome of one watermark evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatermarkDecision {
    /// Watermark to publish.
    pub query_integrity_time: i64,
    /// New value for the saved watermark, if it must change.
    pub persist: Option<i64>,
}

/// Decides the watermark from `inputs`. Pure.
pub fn evaluate(inputs: WatermarkInputs) -> WatermarkDecision {
    let WatermarkInputs {
        super_run_start,
        super_cycle_start,
        metadata_rebuild_time,
        saved_query_integrity_time: saved,
    } = inputs;

    if super_cycle_start != 0
        && super_cycle_start > super_run_start
        && metadata_rebuild_time > 0
        && super_cycle_start > metadata_rebuild_time
    {
        return WatermarkDecision {
            query_integrity_time: super_cycle_start,
            persist: (super_cycle_start != saved).then_some(super_cycle_start),
        };
    }

    if saved != 0 && metadata_rebuild_time > 0 && saved > metadata_rebuild_time {
        return WatermarkDecision {
            query_integrity_time: saved,
            persist: None,
        };
    }

    WatermarkDecision {
        query_integrity_time: 0,
        persist: (saved != 0).then_some(0),
    }
}

/// Live and persisted watermark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIntegrityWatermark {
    query_integrity_time: i64,
    saved_query_integrity_time: i64,
}

impl QueryIntegrityWatermark {
    /// Restores the saved watermark. The live value starts at zero and is
    /// derived on the first recompute.
    pub fn load(store: &dyn ConfigStore) -> Self {
        Self {
            query_integrity_time: 0,
            saved_query_integrity_time: store.get_i64(KEY_SAVED_QUERY_INTEGRITY_TIME).unwrap_or(0),
        }
    }

    /// Live watermark.
    pub fn query_integrity_time(&self) -> i64 {
        self.query_integrity_time
    }

    /// Persisted watermark.
    pub fn saved_query_integrity_time(&self) -> i64 {
        self.saved_query_integrity_time
    }

    /// Re-evaluates the watermark and persists it when the saved copy must change.
    /// Returns the live value.
    pub fn recompute(
        &mut self,
        super_run_start: i64,
        super_cycle_start: i64,
        metadata_rebuild_time: i64,
        store: &dyn ConfigStore,
    ) -> i64 {
        let decision = evaluate(WatermarkInputs {
            super_run_start,
            super_cycle_start,
            metadata_rebuild_time,
            saved_query_integrity_time: self.saved_query_integrity_time,
        });

        if decision.query_integrity_time != self.query_integrity_time {
            info!(
                old = self.query_integrity_time,
                new = decision.query_integrity_time,
                metadata_rebuild_time,
                "query integrity time changed"
            );
        }
        self.query_integrity_time = decision.query_integrity_time;

        if let Some(saved) = decision.persist {
            // In-memory value advances even if the write fails.
            self.saved_query_integrity_time = saved;
            if let Err(e) = store.put(KEY_SAVED_QUERY_INTEGRITY_TIME, &saved.to_string()) {
                error!(error = %e, saved, "failed to persist query integrity time");
            }
        }
        self.query_integrity_time
    }
}

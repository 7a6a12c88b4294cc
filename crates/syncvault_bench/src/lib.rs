//! Benchmark utilities.

#![warn(missing_docs)]

use rand::{Rng, SeedableRng};
use std::sync::Arc;
use syncvault_core::HistoryModel;
use syncvault_protocol::{DatabaseVersion, FileMetadata, ReplicaId, Timestamp};

/// Generate random data of the specified size.
pub fn random_data(size: usize) -> Vec<u8> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(size as u64);
    (0..size).map(|_| rng.gen()).collect()
}

/// Database versions from `replicas` replicas taking turns, each recording
/// `files` empty files per version and merging the others' work every
/// other round, so the set mixes causal chains with concurrent versions.
pub fn history_fixture(replicas: usize, rounds: usize, files: usize) -> Vec<Arc<DatabaseVersion>> {
    let mut models: Vec<HistoryModel> = (0..replicas)
        .map(|i| HistoryModel::new(ReplicaId::new(format!("replica{i}")).expect("valid id")))
        .collect();
    let mut all: Vec<Arc<DatabaseVersion>> = Vec::new();

    for round in 0..rounds {
        for (i, model) in models.iter_mut().enumerate() {
            if round % 2 == 1 {
                let others: Vec<DatabaseVersion> =
                    all.iter().map(|dv| (**dv).clone()).collect();
                model.merge(others).expect("merge");
            }
            model.begin_database_version().expect("begin");
            for f in 0..files {
                let path = format!("r{i}/round{round}/file{f}.txt");
                let meta = FileMetadata::file(0, Timestamp::from_millis(1_000));
                model.record_version(&path, meta, &[]).expect("record");
            }
            all.push(model.seal_database_version().expect("seal"));
        }
    }
    all
}

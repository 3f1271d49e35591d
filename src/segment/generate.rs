//! Segment config generation for a whole catalog

use tracing::info;

use super::{check_seconds, Placement, SegmentTable};
use crate::catalog::{Bucket, Catalog, CatalogError, Quota};

/// Per-bucket generation rule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketRule {
    pub len: f64,
    pub max_start: f64,
    pub randomize: bool,
    /// Only the first N songs of the bucket
    pub subset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub seed: u64,
    pub min_start: f64,
    pub clamp_to_duration: bool,
    pub shared: BucketRule,
    pub favorite: BucketRule,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            seed: 1234,
            min_start: 10.0,
            clamp_to_duration: true,
            shared: BucketRule {
                len: 30.0,
                max_start: 60.0,
                randomize: true,
                subset: None,
            },
            favorite: BucketRule {
                len: 30.0,
                max_start: 120.0,
                randomize: true,
                subset: None,
            },
        }
    }
}

impl GenerateOptions {
    /// Every length or start that is not a usable number of seconds
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        check_seconds(&mut problems, "min_start", self.min_start, false);
        for (name, rule) in [("shared", &self.shared), ("favorite", &self.favorite)] {
            check_seconds(&mut problems, &format!("{}.len", name), rule.len, true);
            check_seconds(&mut problems, &format!("{}.max_start", name), rule.max_start, false);
        }
        problems
    }

    fn rule(&self, bucket: Bucket) -> &BucketRule {
        match bucket {
            Bucket::Shared => &self.shared,
            Bucket::Favorite => &self.favorite,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSegments {
    pub shared: SegmentTable,
    pub favorite: SegmentTable,
}

/// One entry per song, keyed by song id. Durations must already be on the
/// catalog entries for clamping to apply.
pub fn generate_tables(catalog: &Catalog, opts: &GenerateOptions) -> Result<GeneratedSegments, CatalogError> {
    let quota = Quota {
        shared: opts
            .shared
            .subset
            .unwrap_or_else(|| catalog.bucket(Bucket::Shared).count()),
        favorite: opts
            .favorite
            .subset
            .unwrap_or_else(|| catalog.bucket(Bucket::Favorite).count()),
    };
    let selected = catalog.clone().select(Some(quota))?;

    let mut out = GeneratedSegments {
        shared: SegmentTable::default(),
        favorite: SegmentTable::default(),
    };
    for entry in selected.entries() {
        let rule = opts.rule(entry.bucket);
        let placement = Placement {
            len: rule.len,
            min_start: opts.min_start,
            max_start: rule.max_start,
            randomize: rule.randomize,
            clamp_to_duration: opts.clamp_to_duration,
        };
        let segment = placement.place(opts.seed, &entry.song_id, entry.duration_sec);
        match entry.bucket {
            Bucket::Shared => out.shared.insert(entry.song_id.clone(), segment),
            Bucket::Favorite => out.favorite.insert(entry.song_id.clone(), segment),
        }
    }

    info!(
        shared = out.shared.len(),
        favorite = out.favorite.len(),
        "generated segment configs"
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogEntry;
    use crate::segment::Segment;
    use std::path::PathBuf;

    fn catalog() -> Catalog {
        let entry = |id: &str, bucket: Bucket, duration: Option<f64>| CatalogEntry {
            song_id: id.to_string(),
            stem: id.to_string(),
            relative_path: PathBuf::from(format!("{}/{}.wav", bucket, id)),
            bucket,
            duration_sec: duration,
        };
        Catalog::from_entries(
            PathBuf::from("/music"),
            vec![
                entry("s1", Bucket::Shared, Some(200.0)),
                entry("s2", Bucket::Shared, Some(20.0)),
                entry("s3", Bucket::Shared, None),
                entry("f1", Bucket::Favorite, Some(240.0)),
            ],
        )
    }

    #[test]
    fn test_generates_every_song() {
        let out = generate_tables(&catalog(), &GenerateOptions::default()).unwrap();
        assert_eq!(out.shared.len(), 3);
        assert_eq!(out.favorite.len(), 1);
        // shorter than the requested length
        assert_eq!(out.shared.lookup(&["s2"]), Some(Segment::new(10.0, 20.0)));
        assert_eq!(out, generate_tables(&catalog(), &GenerateOptions::default()).unwrap());
    }

    #[test]
    fn test_problems_list_bad_rules() {
        assert!(GenerateOptions::default().problems().is_empty());
        let mut opts = GenerateOptions::default();
        opts.shared.len = f64::NAN;
        opts.favorite.max_start = f64::INFINITY;
        assert_eq!(
            opts.problems().len(),
            2,
            "{:?}",
            opts.problems()
        );
    }

    #[test]
    fn test_subset_and_fixed_start() {
        let mut opts = GenerateOptions::default();
        opts.shared.subset = Some(1);
        opts.shared.randomize = false;
        let out = generate_tables(&catalog(), &opts).unwrap();
        assert_eq!(out.shared.len(), 1);
        assert_eq!(out.shared.lookup(&["s1"]), Some(Segment::new(10.0, 30.0)));

        opts.favorite.subset = Some(2);
        assert!(matches!(
            generate_tables(&catalog(), &opts),
            Err(CatalogError::InsufficientQuota(_))
        ));
    }
}

//! Read-through, eviction and coverage behaviour of the cache facade.

use spatial_cache::{CacheConfig, CacheError, QueryFilter, Record, Region, Residual, SpanningPolicy};
use spatial_cache_int_test::test_util::{
    cleanup, create_file_context, create_memory_context, expected_ids, random_records, run_test,
    sorted_ids, unit_config, Feature, MockSource, TestContext,
};
use spatial_cache::CacheResult;

#[ctor::ctor]
fn init() {
    colog::init();
}

/// Runs `test` once against an in-memory cache and once against a
/// file-backed one.
fn on_both_storages<F>(config: CacheConfig, test: F)
where
    F: Fn(TestContext) -> CacheResult<()>,
{
    run_test(|| create_memory_context(config.clone()), &test, cleanup);
    run_test(|| create_file_context(config.clone()), &test, cleanup);
}

fn feature(id: u64, shape: Region) -> Record<Feature> {
    Record::new(
        id,
        shape,
        Feature {
            name: format!("feature-{}", id),
            class: 0,
        },
    )
}

#[test]
fn test_read_through_matches_source() {
    on_both_storages(unit_config(5000, 64).unwrap(), |ctx| {
        let cache = ctx.cache();
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut source = MockSource::new(random_records(21, 1000, &bounds, 0.01));

        for query in [
            Region::rect(0.1, 0.1, 0.4, 0.4),
            Region::rect(0.3, 0.3, 0.7, 0.6),
            Region::rect(0.0, 0.0, 1.0, 1.0),
        ] {
            let found = cache.get(&mut source, &query)?;
            assert_eq!(sorted_ids(&found), expected_ids(source.records(), &query));
        }
        Ok(())
    });
}

#[test]
fn test_repeated_query_is_served_from_cache() {
    on_both_storages(unit_config(1000, 16).unwrap(), |ctx| {
        let cache = ctx.cache();
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut source = MockSource::new(random_records(3, 300, &bounds, 0.01));
        let query = Region::rect(0.2, 0.2, 0.6, 0.6);

        let first = cache.get(&mut source, &query)?;
        assert_eq!(source.fetch_count(), 1);
        let second = cache.get(&mut source, &query)?;
        assert_eq!(source.fetch_count(), 1);
        assert_eq!(sorted_ids(&first), sorted_ids(&second));

        // A sub-query is covered as well.
        cache.get(&mut source, &Region::rect(0.3, 0.3, 0.4, 0.4))?;
        assert_eq!(source.fetch_count(), 1);
        Ok(())
    });
}

#[test]
fn test_partial_overlap_fetches_only_the_residual() {
    on_both_storages(unit_config(1000, 16).unwrap(), |ctx| {
        let cache = ctx.cache();
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut source = MockSource::new(random_records(8, 300, &bounds, 0.01));

        cache.get(&mut source, &Region::rect(0.0, 0.0, 0.5, 1.0))?;
        let found = cache.get(&mut source, &Region::rect(0.25, 0.0, 0.75, 1.0))?;
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(source.fetched()[1], Region::rect(0.5, 0.0, 0.75, 1.0));
        assert_eq!(
            sorted_ids(&found),
            expected_ids(source.records(), &Region::rect(0.25, 0.0, 0.75, 1.0))
        );
        Ok(())
    });
}

#[test]
fn test_data_count_never_exceeds_capacity() {
    on_both_storages(unit_config(300, 64).unwrap(), |ctx| {
        let cache = ctx.cache();
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut source = MockSource::new(random_records(77, 1000, &bounds, 0.001));

        for i in 0..40u32 {
            let x = (i * 13 % 16) as f64 / 20.0;
            let y = (i * 7 % 16) as f64 / 20.0;
            let query = Region::rect(x, y, x + 0.25, y + 0.25);
            let found = cache.get(&mut source, &query)?;
            assert_eq!(sorted_ids(&found), expected_ids(source.records(), &query));
            assert!(cache.statistics().data_count <= 300);
        }
        Ok(())
    });
}

#[test]
fn test_least_recently_used_tile_is_evicted() {
    on_both_storages(unit_config(4, 4).unwrap(), |ctx| {
        let cache = ctx.cache();
        let tile_a = Region::rect(0.05, 0.05, 0.45, 0.45);
        let tile_b = Region::rect(0.55, 0.05, 0.95, 0.45);
        let tile_c = Region::rect(0.05, 0.55, 0.45, 0.95);

        cache.put(
            vec![
                feature(1, Region::rect(0.1, 0.1, 0.11, 0.11)),
                feature(2, Region::rect(0.2, 0.2, 0.21, 0.21)),
            ],
            &tile_a,
        )?;
        cache.put(
            vec![
                feature(3, Region::rect(0.6, 0.1, 0.61, 0.11)),
                feature(4, Region::rect(0.7, 0.2, 0.71, 0.21)),
            ],
            &tile_b,
        )?;
        // Touch A so B becomes the oldest.
        assert_eq!(cache.peek(&tile_a)?.len(), 2);

        cache.put(
            vec![
                feature(5, Region::rect(0.1, 0.6, 0.11, 0.61)),
                feature(6, Region::rect(0.2, 0.7, 0.21, 0.71)),
            ],
            &tile_c,
        )?;

        assert_eq!(cache.statistics().data_count, 4);
        assert_eq!(cache.peek(&tile_a)?.len(), 2);
        assert!(cache.peek(&tile_b)?.is_empty());
        assert_eq!(cache.peek(&tile_c)?.len(), 2);

        // Coverage backed by the evicted tile is gone.
        let guard = cache.lock();
        assert!(guard.residual(&tile_a)?.is_covered());
        assert_eq!(guard.residual(&tile_b)?, Residual::Missing(tile_b.clone()));
        Ok(())
    });
}

#[test]
fn test_oversized_put_leaves_cache_untouched() {
    on_both_storages(unit_config(2, 4).unwrap(), |ctx| {
        let cache = ctx.cache();
        cache.put(vec![feature(1, Region::rect(0.1, 0.1, 0.2, 0.2))], &Region::rect(0.0, 0.0, 0.3, 0.3))?;

        let batch = vec![
            feature(2, Region::rect(0.6, 0.6, 0.7, 0.7)),
            feature(3, Region::rect(0.7, 0.7, 0.8, 0.8)),
            feature(4, Region::rect(0.8, 0.8, 0.9, 0.9)),
        ];
        match cache.put(batch, &Region::rect(0.5, 0.5, 1.0, 1.0)) {
            Err(CacheError::Oversized { size, capacity }) => {
                assert_eq!(size, 3);
                assert_eq!(capacity, 2);
            }
            other => panic!("expected Oversized, got {:?}", other.map(|_| ())),
        }
        assert_eq!(cache.statistics().data_count, 1);
        assert!(cache.lock().residual(&Region::rect(0.0, 0.0, 0.3, 0.3))?.is_covered());
        Ok(())
    });
}

#[test]
fn test_remove_invalidates_data_and_coverage() {
    on_both_storages(unit_config(1000, 16).unwrap(), |ctx| {
        let cache = ctx.cache();
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut source = MockSource::new(random_records(31, 200, &bounds, 0.01));

        cache.get(&mut source, &bounds)?;
        assert_eq!(source.fetch_count(), 1);

        let hole = Region::rect(0.1, 0.1, 0.15, 0.15);
        cache.remove(&hole)?;
        assert!(cache.peek(&hole)?.is_empty());

        let found = cache.get(&mut source, &hole)?;
        assert_eq!(source.fetch_count(), 2);
        assert_eq!(sorted_ids(&found), expected_ids(source.records(), &hole));
        Ok(())
    });
}

#[test]
fn test_filter_matching() {
    on_both_storages(unit_config(1000, 16).unwrap(), |ctx| {
        let cache = ctx.cache();
        let mut source = MockSource::new(Vec::new());
        cache.get(&mut source, &Region::rect(0.0, 0.0, 0.5, 0.5))?;

        let guard = cache.lock();
        assert_eq!(
            guard.match_filter(&QueryFilter::BBox(Region::rect(0.1, 0.1, 0.2, 0.2))),
            QueryFilter::Exclude
        );
        assert_eq!(
            guard.match_filter(&QueryFilter::BBox(Region::rect(0.0, 0.0, 0.5, 1.0))),
            QueryFilter::BBox(Region::rect(0.0, 0.5, 0.5, 1.0))
        );
        let other = QueryFilter::Other("name = 'A1'".into());
        assert_eq!(guard.match_filter(&other), other);
        Ok(())
    });
}

#[test]
fn test_reject_policy_refuses_spanning_records() {
    let config = CacheConfig::builder(Region::rect(0.0, 0.0, 1.0, 1.0))
        .tile_capacity(4)
        .spanning_policy(SpanningPolicy::Reject)
        .build()
        .unwrap();
    on_both_storages(config, |ctx| {
        let cache = ctx.cache();
        let spanning = feature(1, Region::rect(0.4, 0.4, 0.6, 0.6));
        assert!(matches!(
            cache.put(vec![spanning], &Region::rect(0.0, 0.0, 1.0, 1.0)),
            Err(CacheError::InvalidArgument(_))
        ));
        assert_eq!(cache.statistics().data_count, 0);

        // Through the read path the record is returned but not cached.
        let mut source = MockSource::new(vec![feature(2, Region::rect(0.4, 0.4, 0.6, 0.6))]);
        let found = cache.get(&mut source, &Region::rect(0.0, 0.0, 1.0, 1.0))?;
        assert_eq!(found.len(), 1);
        assert_eq!(cache.statistics().data_count, 0);
        cache.get(&mut source, &Region::rect(0.0, 0.0, 1.0, 1.0))?;
        assert_eq!(source.fetch_count(), 2);
        Ok(())
    });
}

#[test]
fn test_queries_outside_bounds_are_clipped() {
    on_both_storages(unit_config(1000, 16).unwrap(), |ctx| {
        let cache = ctx.cache();
        let mut source = MockSource::new(vec![feature(1, Region::rect(0.9, 0.9, 0.95, 0.95))]);

        assert!(cache
            .get(&mut source, &Region::rect(2.0, 2.0, 3.0, 3.0))?
            .is_empty());
        assert_eq!(source.fetch_count(), 0);

        let found = cache.get(&mut source, &Region::rect(0.5, 0.5, 2.0, 2.0))?;
        assert_eq!(found.len(), 1);
        assert_eq!(source.fetched()[0], Region::rect(0.5, 0.5, 1.0, 1.0));
        Ok(())
    });
}

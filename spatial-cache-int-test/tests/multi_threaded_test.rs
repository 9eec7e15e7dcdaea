use std::thread;

use spatial_cache::Region;
use spatial_cache_int_test::test_util::{
    cleanup, create_file_context, create_memory_context, expected_ids, random_records, run_test,
    sorted_ids, unit_config, MockSource,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn hammer(ctx: spatial_cache_int_test::test_util::TestContext) -> spatial_cache::CacheResult<()> {
    let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
    let records = random_records(99, 2000, &bounds, 0.002);

    thread::scope(|scope| {
        for worker in 0..4u32 {
            let cache = ctx.cache();
            let records = records.clone();
            scope.spawn(move || {
                let mut source = MockSource::new(records);
                for i in 0..25u32 {
                    let x = ((i * 11 + worker * 5) % 16) as f64 / 20.0;
                    let y = ((i * 3 + worker * 7) % 16) as f64 / 20.0;
                    let query = Region::rect(x, y, x + 0.2, y + 0.2);
                    let found = cache.get(&mut source, &query).unwrap();
                    assert_eq!(sorted_ids(&found), expected_ids(source.records(), &query));
                    assert!(cache.statistics().data_count <= 500);
                }
            });
        }
    });
    Ok(())
}

#[test]
fn test_shared_cache_under_concurrent_queries() {
    run_test(|| create_memory_context(unit_config(500, 64)?), hammer, cleanup);
    run_test(|| create_file_context(unit_config(500, 64)?), hammer, cleanup);
}

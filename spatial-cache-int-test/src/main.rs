use spatial_cache::{CacheConfig, CacheResult, Region};
use spatial_cache_int_test::test_util::{
    cleanup, create_file_context, random_records, MockSource,
};

fn main() -> CacheResult<()> {
    colog::init();
    println!("Starting read-through load run...");

    let bounds = Region::rect(0.0, 0.0, 100.0, 100.0);
    let config = CacheConfig::builder(bounds.clone())
        .tile_capacity(400)
        .capacity(20_000)
        .build()?;
    let ctx = create_file_context(config)?;
    let cache = ctx.cache();
    let mut source = MockSource::new(random_records(1, 50_000, &bounds, 0.5));

    let start = std::time::Instant::now();
    let mut returned = 0usize;
    for i in 0..2_000u32 {
        let x = (i * 37 % 95) as f64;
        let y = (i * 53 % 95) as f64;
        returned += cache
            .get(&mut source, &Region::rect(x, y, x + 5.0, y + 5.0))?
            .len();
    }
    println!(
        "Answered 2000 queries ({} records) with {} fetches in {:?}",
        returned,
        source.fetch_count(),
        start.elapsed()
    );
    println!("Index: {}", cache.statistics());

    cleanup(ctx)
}

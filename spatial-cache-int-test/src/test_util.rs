use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spatial_cache::{
    BincodeCodec, CacheConfig, CacheResult, FileStorage, MemoryStorage, NodeStorage, Record,
    RecordSource, Region, SharedSpatialCache, SpatialCache,
};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Payload used throughout the integration tests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub class: u8,
}

pub type TestStorage = Box<dyn NodeStorage>;
pub type TestCache = SpatialCache<Feature, TestStorage, BincodeCodec>;
pub type SharedTestCache = SharedSpatialCache<Feature, TestStorage, BincodeCodec>;

/// Runs a test between a setup and a teardown step.
///
/// The teardown runs even when the test fails or panics, so temp files are
/// not left behind.
pub fn run_test<B, T, A>(before: B, test: T, after: A)
where
    B: FnOnce() -> CacheResult<TestContext>,
    T: FnOnce(TestContext) -> CacheResult<()>,
    A: FnOnce(TestContext) -> CacheResult<()>,
{
    let ctx = match before() {
        Ok(ctx) => ctx,
        Err(e) => panic!("Before run failed: {:?}", e),
    };

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| test(ctx.clone())));
    let teardown = after(ctx);

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => panic!("Test failed: {:?}", e),
        Err(panic_err) => panic::resume_unwind(panic_err),
    }
    if let Err(e) = teardown {
        panic!("After run failed: {:?}", e);
    }
}

#[derive(Clone)]
pub struct TestContext {
    path: Option<PathBuf>,
    cache: SharedTestCache,
}

impl TestContext {
    pub fn new(path: Option<PathBuf>, cache: SharedTestCache) -> Self {
        Self { path, cache }
    }

    /// Backing file, for file-based contexts.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn cache(&self) -> SharedTestCache {
        self.cache.clone()
    }
}

pub fn random_path() -> PathBuf {
    let id = uuid::Uuid::new_v4();
    env::temp_dir().join(format!("spatial_cache_{}.log", id))
}

/// Unit-square configuration used by most tests.
pub fn unit_config(capacity: usize, tile_capacity: usize) -> CacheResult<CacheConfig> {
    CacheConfig::builder(Region::rect(0.0, 0.0, 1.0, 1.0))
        .capacity(capacity)
        .tile_capacity(tile_capacity)
        .build()
}

pub fn create_memory_context(config: CacheConfig) -> CacheResult<TestContext> {
    let storage: TestStorage = Box::new(MemoryStorage::new());
    let cache = SpatialCache::new(config, storage, BincodeCodec)?;
    Ok(TestContext::new(None, SharedSpatialCache::new(cache)))
}

pub fn create_file_context(config: CacheConfig) -> CacheResult<TestContext> {
    let path = random_path();
    let storage: TestStorage = Box::new(FileStorage::create(&path)?);
    let cache = SpatialCache::new(config, storage, BincodeCodec)?;
    Ok(TestContext::new(Some(path), SharedSpatialCache::new(cache)))
}

/// Opens a cache over the log at `path`, reusing whatever it holds.
pub fn open_file_cache(config: CacheConfig, path: &Path) -> CacheResult<TestCache> {
    let storage: TestStorage = Box::new(FileStorage::open_or_create(path)?);
    SpatialCache::open(config, storage, BincodeCodec)
}

pub fn cleanup(ctx: TestContext) -> CacheResult<()> {
    let TestContext { path, cache } = ctx;
    drop(cache);
    if let Some(path) = path {
        remove_file(&path);
    }
    Ok(())
}

pub fn remove_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("Warning: Failed to remove test file {:?}: {:?}", path, e),
    }
}

/// Small random rectangles inside `bounds`, with ids `0..count`.
pub fn random_records(seed: u64, count: usize, bounds: &Region, max_extent: f64) -> Vec<Record<Feature>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let w = rng.gen_range(0.0..max_extent);
            let h = rng.gen_range(0.0..max_extent);
            let x = rng.gen_range(bounds.low(0)..bounds.high(0) - w);
            let y = rng.gen_range(bounds.low(1)..bounds.high(1) - h);
            Record::new(
                i as u64,
                Region::rect(x, y, x + w, y + h),
                Feature {
                    name: format!("feature-{}", i),
                    class: (i % 7) as u8,
                },
            )
        })
        .collect()
}

pub fn sorted_ids(records: &[Record<Feature>]) -> Vec<u64> {
    let mut ids: Vec<u64> = records.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Brute-force answer to an intersection query.
pub fn expected_ids(records: &[Record<Feature>], query: &Region) -> Vec<u64> {
    let mut ids: Vec<u64> = records
        .iter()
        .filter(|r| r.shape.intersects(query))
        .map(|r| r.id)
        .collect();
    ids.sort_unstable();
    ids
}

/// In-memory record source that logs every fetch.
pub struct MockSource {
    records: Vec<Record<Feature>>,
    bounds: Option<Region>,
    fetched: Vec<Region>,
}

impl MockSource {
    pub fn new(records: Vec<Record<Feature>>) -> Self {
        Self {
            records,
            bounds: None,
            fetched: Vec::new(),
        }
    }

    pub fn with_bounds(mut self, bounds: Region) -> Self {
        self.bounds = Some(bounds);
        self
    }

    pub fn records(&self) -> &[Record<Feature>] {
        &self.records
    }

    /// Regions requested so far, oldest first.
    pub fn fetched(&self) -> &[Region] {
        &self.fetched
    }

    pub fn fetch_count(&self) -> usize {
        self.fetched.len()
    }
}

impl RecordSource for MockSource {
    type Payload = Feature;

    fn bounds(&self) -> Option<Region> {
        self.bounds.clone()
    }

    fn fetch(&mut self, region: &Region) -> CacheResult<Vec<Record<Feature>>> {
        self.fetched.push(region.clone());
        Ok(self
            .records
            .iter()
            .filter(|r| r.shape.intersects(region))
            .cloned()
            .collect())
    }
}

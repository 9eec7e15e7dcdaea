//! Query behaviour of the grid index over both storage backends.

use spatial_cache::{
    BincodeCodec, CacheResult, Collector, FileStorage, GridIndex, MemoryStorage, NodeCounter,
    NodeId, NodeStorage, Partitioning, Region,
};
use spatial_cache_int_test::test_util::{
    expected_ids, random_path, random_records, remove_file, sorted_ids, Feature,
};

#[ctor::ctor]
fn init() {
    colog::init();
}

fn with_storages<F>(test: F)
where
    F: Fn(Box<dyn NodeStorage>) -> CacheResult<()>,
{
    test(Box::new(MemoryStorage::new())).unwrap();

    let path = random_path();
    let storage = FileStorage::create(&path).unwrap();
    let result = test(Box::new(storage));
    remove_file(&path);
    result.unwrap();
}

#[test]
fn test_random_rectangles_match_brute_force() {
    with_storages(|storage| {
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut index = GridIndex::new(bounds.clone(), 100, storage, BincodeCodec)?;
        let records = random_records(42, 1000, &bounds, 0.02);
        for record in &records {
            index.insert_data(record.payload.clone(), record.shape.clone(), record.id)?;
        }
        assert_eq!(index.statistics().data_count, 1000);

        for query in [
            Region::rect(0.0, 0.0, 1.0, 1.0),
            Region::rect(0.2, 0.3, 0.45, 0.8),
            Region::rect(0.5, 0.5, 0.5, 0.5),
            Region::rect(0.95, 0.0, 1.0, 0.05),
        ] {
            let found = index.entries_intersecting(&query)?;
            assert_eq!(sorted_ids(&found), expected_ids(&records, &query));
            assert_eq!(found.len(), expected_ids(&records, &query).len());

            let mut collector = Collector::new();
            index.containment_query(&query, &mut collector)?;
            let mut contained: Vec<u64> = records
                .iter()
                .filter(|r| query.contains(&r.shape))
                .map(|r| r.id)
                .collect();
            contained.sort_unstable();
            assert_eq!(sorted_ids(&collector.entries), contained);
        }

        let mut counter = NodeCounter::default();
        index.intersection_query(&bounds, &mut counter)?;
        assert_eq!(counter.nodes_visited as u64, index.statistics().node_count);
        Ok(())
    });
}

#[test]
fn test_point_location_finds_covering_shapes() {
    with_storages(|storage| {
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut index = GridIndex::new(bounds.clone(), 25, storage, BincodeCodec)?;
        let records = random_records(5, 400, &bounds, 0.1);
        for record in &records {
            index.insert_data(record.payload.clone(), record.shape.clone(), record.id)?;
        }

        let point = [0.37, 0.61];
        let mut collector = Collector::new();
        index.point_location_query(&point, &mut collector)?;
        let probe = Region::point(point.to_vec())?;
        assert_eq!(sorted_ids(&collector.entries), expected_ids(&records, &probe));
        Ok(())
    });
}

#[test]
fn test_root_split_of_ten_by_ten_square() {
    let bounds = Region::rect(0.0, 20.0, 10.0, 30.0);
    let index: GridIndex<Feature, _, _> =
        GridIndex::new(bounds.clone(), 100, MemoryStorage::new(), BincodeCodec).unwrap();

    assert_eq!(index.layout().capacity(), 100);
    assert_eq!(index.layout().tile_size(), 1.0);
    assert_eq!(index.layout().tiles_per_axis(), &[10, 10]);
    let tiles = index.tiles_intersecting(&bounds);
    assert_eq!(tiles.len(), 100);
    let expected_area = bounds.area() / 100.0;
    for tile in &tiles {
        assert!(tile.region().intersects(&bounds));
        assert!((tile.region().area() - expected_area).abs() <= expected_area * 0.01);
    }

    let first = index.tiles_intersecting(&Region::point(vec![0.5, 20.5]).unwrap());
    assert_eq!(first, vec![NodeId::new(Region::rect(0.0, 20.0, 1.0, 21.0))]);
    // Tiles are only materialised on insert.
    assert_eq!(index.statistics().node_count, 1);
}

#[test]
fn test_flush_leaves_only_the_root() {
    with_storages(|storage| {
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut index = GridIndex::new(bounds.clone(), 16, storage, BincodeCodec)?;
        for record in random_records(9, 200, &bounds, 0.05) {
            index.insert_data(record.payload, record.shape, record.id)?;
        }
        assert!(index.statistics().node_count > 1);

        index.flush()?;
        let stats = index.statistics();
        assert_eq!(stats.node_count, 1);
        assert_eq!(stats.data_count, 0);
        assert!(index.tile_ids().is_empty());
        assert!(index.entries_intersecting(&bounds)?.is_empty());
        assert_eq!(index.storage().len(), 0);
        Ok(())
    });
}

#[test]
fn test_delete_and_region_removal() {
    with_storages(|storage| {
        let bounds = Region::rect(0.0, 0.0, 1.0, 1.0);
        let mut index = GridIndex::new(bounds.clone(), 4, storage, BincodeCodec)?;
        let records = random_records(13, 100, &bounds, 0.02);
        for record in &records {
            index.insert_data(record.payload.clone(), record.shape.clone(), record.id)?;
        }

        let victim = &records[10];
        assert!(index.delete_data(&victim.shape, victim.id)?);
        assert!(!index.delete_data(&victim.shape, victim.id)?);
        assert_eq!(index.statistics().data_count, 99);

        let corner = Region::rect(0.0, 0.0, 0.2, 0.2);
        index.remove_region(&corner)?;
        assert!(index.entries_intersecting(&corner)?.is_empty());
        // The opposite tile is untouched.
        let far = Region::rect(0.6, 0.6, 1.0, 1.0);
        let survivors: Vec<_> = records
            .iter()
            .filter(|r| r.id != victim.id && far.contains(&r.shape))
            .collect();
        let mut collector = Collector::new();
        index.containment_query(&far, &mut collector)?;
        assert_eq!(collector.entries.len(), survivors.len());
        Ok(())
    });
}

mod common;

use common::*;
use std::time::Duration;
use supply_census::{ItemStack, ScanMode, ScanOutcome, StorageUnit};

#[tokio::test]
async fn test_per_good_cap_applies_before_publishing() {
    let fixture = Fixture::new(test_config().caps(10_000, 5_000));
    let goods = &fixture.goods;
    fixture.world.place(chest(
        at(3, 3),
        vec![ItemStack::new(goods.iron, 8_000), ItemStack::new(goods.wheat, 4_000)],
    ));

    let outcome = fixture.service.scan_now(false).await;
    assert!(outcome.published());

    let snapshot = fixture.service.snapshot();
    assert_eq!(snapshot.quantity_of(goods.iron), 5_000);
    assert_eq!(snapshot.quantity_of(goods.wheat), 4_000);
    assert_eq!(snapshot.totals.len(), 2);
}

#[tokio::test]
async fn test_empty_units_are_not_counted() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 10)]));
    fixture
        .world
        .place(chest(at(2, 1), vec![ItemStack::new(goods.wheat, 5)]));
    fixture.world.place(chest(at(3, 1), Vec::new()));

    let outcome = fixture.service.scan_now(false).await;

    assert_eq!(
        outcome,
        ScanOutcome::Completed {
            mode: ScanMode::Full,
            cells_scanned: 1,
            cells_cached: 0,
            unit_count: 2,
        }
    );
    assert_eq!(fixture.service.last_unit_count(), 2);
}

#[tokio::test]
async fn test_double_container_counted_once() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    let contents = vec![ItemStack::new(goods.oak_log, 64)];
    fixture
        .world
        .place(chest(at(4, 4), contents.clone()).with_partner(at(5, 4)));
    fixture
        .world
        .place(chest(at(5, 4), contents).with_partner(at(4, 4)));

    fixture.service.scan_now(false).await;

    let snapshot = fixture.service.snapshot();
    assert_eq!(snapshot.quantity_of(goods.oak_log), 64);
    assert_eq!(snapshot.unit_count, 1);
}

#[tokio::test]
async fn test_nested_storage_counted_one_level() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    let inner = ItemStack::new(goods.shulker_box, 1).with_nested(vec![ItemStack::new(goods.iron, 7)]);
    let outer = ItemStack::new(goods.shulker_box, 1).with_nested(vec![inner]);
    fixture.world.place(chest(at(0, 0), vec![outer]));

    fixture.service.scan_now(false).await;

    let snapshot = fixture.service.snapshot();
    assert_eq!(snapshot.quantity_of(goods.shulker_box), 2);
    assert_eq!(snapshot.quantity_of(goods.iron), 0);
}

#[tokio::test]
async fn test_unchanged_world_scans_identically() {
    let fixture = Fixture::new(test_config().cache_enabled(false));
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 300)]));
    fixture
        .world
        .place(chest(at(40, -20), vec![ItemStack::new(goods.wheat, 90)]));

    fixture.service.scan_now(false).await;
    let first = fixture.service.current_totals();
    fixture.service.scan_now(false).await;
    let second = fixture.service.current_totals();

    assert_eq!(first, second);
    assert_eq!(fixture.service.cached_cells(), 0);
}

#[tokio::test]
async fn test_dirty_cell_rescanned_while_clean_cells_come_from_cache() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 10)]));
    fixture
        .world
        .place(chest(at(33, 1), vec![ItemStack::new(goods.wheat, 10)]));

    let first = fixture.service.scan_now(false).await;
    assert!(matches!(first, ScanOutcome::Completed { mode: ScanMode::Full, cells_scanned: 2, .. }));
    assert_eq!(fixture.service.cached_cells(), 2);

    // change without notification: cache hides it
    fixture
        .world
        .place(chest(at(2, 1), vec![ItemStack::new(goods.iron, 5)]));
    let second = fixture.service.scan_now(false).await;
    assert!(matches!(
        second,
        ScanOutcome::Completed { mode: ScanMode::Incremental, cells_scanned: 0, cells_cached: 2, .. }
    ));
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 10);

    fixture.service.mark_dirty(cell(0, 0));
    let third = fixture.service.scan_now(false).await;
    assert!(matches!(
        third,
        ScanOutcome::Completed { mode: ScanMode::Incremental, cells_scanned: 1, cells_cached: 1, .. }
    ));
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 15);
    assert_eq!(fixture.service.snapshot().quantity_of(goods.wheat), 10);
    assert_eq!(fixture.service.dirty_cells(), 0);
}

#[tokio::test]
async fn test_forced_full_scan_ignores_cache() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 10)]));
    fixture.service.scan_now(false).await;

    fixture
        .world
        .place(chest(at(2, 2), vec![ItemStack::new(goods.iron, 1)]));
    let outcome = fixture.service.scan_now(true).await;

    assert!(matches!(outcome, ScanOutcome::Completed { mode: ScanMode::Full, cells_cached: 0, .. }));
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 11);
}

#[tokio::test]
async fn test_unloaded_cells_leave_cache_and_totals() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 10)]));
    fixture
        .world
        .place(chest(at(17, 1), vec![ItemStack::new(goods.iron, 20)]));
    fixture.service.scan_now(false).await;
    assert_eq!(fixture.service.cached_cells(), 2);

    fixture.world.unload_cell(&cell(1, 0));
    fixture.service.scan_now(false).await;

    assert_eq!(fixture.service.cached_cells(), 1);
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 10);
}

#[tokio::test]
async fn test_excluded_realm_is_skipped() {
    let fixture = Fixture::new(test_config().exclude_realm("the_nether"));
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 10)]));
    fixture.world.place(StorageUnit::new(
        supply_census::BlockPos::new("the_nether", 1, 40, 1),
        "barrel",
        vec![ItemStack::new(goods.iron, 99)],
    ));

    fixture.service.scan_now(false).await;

    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 10);
    assert_eq!(fixture.service.snapshot().cells_scanned, 1);
}

#[tokio::test]
async fn test_failed_cell_enumeration_keeps_previous_snapshot() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.wheat, 12)]));
    fixture.service.scan_now(false).await;
    let before = fixture.service.snapshot();

    fixture.world.fail_loaded_cells(true);
    let outcome = fixture.service.scan_now(false).await;

    assert!(matches!(outcome, ScanOutcome::Failed { .. }));
    assert_eq!(fixture.service.last_scan_timestamp(), before.completed_at);
    assert_eq!(fixture.service.current_totals(), before.totals);
    assert_eq!(fixture.service.stats().cycles_failed, 1);
}

#[tokio::test]
async fn test_failed_batch_counts_as_empty() {
    let fixture = Fixture::new(test_config().batch_size(1));
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 4)]));
    fixture
        .world
        .place(chest(at(17, 1), vec![ItemStack::new(goods.iron, 6)]));
    fixture.world.explode_on(cell(1, 0));

    let outcome = fixture.service.scan_now(false).await;

    assert!(matches!(outcome, ScanOutcome::Completed { cells_scanned: 1, .. }));
    let snapshot = fixture.service.snapshot();
    assert_eq!(snapshot.quantity_of(goods.iron), 4);
    assert!(snapshot.partial);
    assert_eq!(fixture.service.stats().batches_failed, 1);
    assert_eq!(fixture.service.cached_cells(), 1);
}

#[tokio::test]
async fn test_unanswered_host_skips_and_rejects_overlap() {
    let config = test_config().host_call_timeout_ms(150);
    let (fixture, _pump) = Fixture::unpumped(config);

    let (first, second) = tokio::join!(
        fixture.service.scan_now(false),
        fixture.service.scan_now(false)
    );

    let outcomes = [first, second];
    assert!(outcomes.contains(&ScanOutcome::SkippedForLoad { load: None }));
    assert!(outcomes.contains(&ScanOutcome::AlreadyRunning));
    assert!(fixture.service.snapshot().is_empty());

    let stats = fixture.service.stats();
    assert_eq!(stats.host_timeouts, 1);
    assert_eq!(stats.cycles_skipped_for_load, 1);
    assert!(!fixture.service.is_scanning());
}

#[tokio::test]
async fn test_force_refresh_before_start_scans_inline() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 3)]));

    let snapshot = fixture.service.force_refresh(Duration::from_secs(5)).await;

    assert_eq!(snapshot.quantity_of(goods.iron), 3);
    assert!(!fixture.service.trigger_scan());
}

#[tokio::test]
async fn test_failed_snapshot_save_keeps_scanning() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_directory");
    std::fs::write(&blocker, b"occupied").unwrap();
    let config = test_config().persistence(true, blocker.join("snapshot.json"));
    let fixture = Fixture::new(config);
    let goods = &fixture.goods;
    fixture
        .world
        .place(chest(at(1, 1), vec![ItemStack::new(goods.iron, 9)]));

    let first = fixture.service.scan_now(false).await;
    assert!(matches!(first, ScanOutcome::Completed { .. }));
    assert_eq!(fixture.service.stats().persist_failures, 1);
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 9);

    fixture
        .world
        .place(chest(at(2, 1), vec![ItemStack::new(goods.iron, 1)]));
    let second = fixture.service.scan_now(true).await;
    assert!(matches!(second, ScanOutcome::Completed { .. }));
    assert_eq!(fixture.service.stats().persist_failures, 2);
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 10);
    assert_eq!(fixture.service.stats().cycles_completed, 2);
}

#[tokio::test]
async fn test_multi_part_at_loaded_edge_counted_by_loaded_half() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    // the west half at x=15 sits in a cell that is not loaded
    fixture.world.place(
        chest(at(16, 0), vec![ItemStack::new(goods.iron, 20)]).with_partner(at(15, 0)),
    );

    fixture.service.scan_now(false).await;

    let snapshot = fixture.service.snapshot();
    assert_eq!(snapshot.quantity_of(goods.iron), 20);
    assert_eq!(snapshot.unit_count, 1);
}

#[tokio::test]
async fn test_multi_part_changes_owner_when_identity_cell_unloads() {
    let fixture = Fixture::new(test_config());
    let goods = &fixture.goods;
    let contents = vec![ItemStack::new(goods.iron, 20)];
    fixture
        .world
        .place(chest(at(15, 0), contents.clone()).with_partner(at(16, 0)));
    fixture
        .world
        .place(chest(at(16, 0), contents).with_partner(at(15, 0)));

    fixture.service.scan_now(false).await;
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 20);

    fixture.world.unload_cell(&cell(0, 0));
    let outcome = fixture.service.scan_now(false).await;
    assert!(matches!(outcome, ScanOutcome::Completed { mode: ScanMode::Incremental, cells_scanned: 1, .. }));
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 20);

    fixture.world.load_cell(cell(0, 0));
    fixture.service.scan_now(false).await;
    assert_eq!(fixture.service.snapshot().quantity_of(goods.iron), 20);
    assert_eq!(fixture.service.snapshot().unit_count, 1);
}

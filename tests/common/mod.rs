#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use supply_census::{
    BlockPos, CellKey, CensusConfig, CensusService, GoodId, GoodRegistry, HostHandle, HostPump,
    HostWorld, ItemStack, LoadProbe, LocalChangeFeed, StorageUnit, host_channel,
};

pub const REALM: &str = "overworld";

/// In-memory world standing in for the host simulation.
pub struct FakeWorld {
    loaded: RwLock<BTreeSet<CellKey>>,
    units: RwLock<HashMap<CellKey, Vec<StorageUnit>>>,
    exploding_cells: RwLock<HashSet<CellKey>>,
    fail_loaded_cells: AtomicBool,
    offers_probe: AtomicBool,
    load: Arc<AtomicU64>,
    enumerations: AtomicUsize,
    degrade: RwLock<Option<(usize, f64)>>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            loaded: RwLock::new(BTreeSet::new()),
            units: RwLock::new(HashMap::new()),
            exploding_cells: RwLock::new(HashSet::new()),
            fail_loaded_cells: AtomicBool::new(false),
            offers_probe: AtomicBool::new(true),
            load: Arc::new(AtomicU64::new(20.0f64.to_bits())),
            enumerations: AtomicUsize::new(0),
            degrade: RwLock::new(None),
        })
    }

    /// Places a unit and loads its cell.
    pub fn place(&self, unit: StorageUnit) {
        let cell = unit.location.cell();
        self.loaded.write().unwrap().insert(cell.clone());
        self.units.write().unwrap().entry(cell).or_default().push(unit);
    }

    pub fn clear_cell(&self, cell: &CellKey) {
        self.units.write().unwrap().remove(cell);
    }

    pub fn load_cell(&self, cell: CellKey) {
        self.loaded.write().unwrap().insert(cell);
    }

    pub fn unload_cell(&self, cell: &CellKey) {
        self.loaded.write().unwrap().remove(cell);
    }

    pub fn set_load(&self, load: f64) {
        self.load.store(load.to_bits(), Ordering::SeqCst);
    }

    pub fn without_probe(&self) {
        self.offers_probe.store(false, Ordering::SeqCst);
    }

    pub fn explode_on(&self, cell: CellKey) {
        self.exploding_cells.write().unwrap().insert(cell);
    }

    pub fn fail_loaded_cells(&self, fail: bool) {
        self.fail_loaded_cells.store(fail, Ordering::SeqCst);
    }

    /// Drops the load metric to `load` once `after` cells were enumerated.
    pub fn degrade_after(&self, after: usize, load: f64) {
        *self.degrade.write().unwrap() = Some((after, load));
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }
}

struct SharedLoad(Arc<AtomicU64>);

impl LoadProbe for SharedLoad {
    fn read_load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

impl HostWorld for FakeWorld {
    fn loaded_cells(&self) -> Vec<CellKey> {
        if self.fail_loaded_cells.load(Ordering::SeqCst) {
            panic!("loaded cell enumeration failed");
        }
        self.loaded.read().unwrap().iter().cloned().collect()
    }

    fn storage_units(&self, cell: &CellKey) -> Vec<StorageUnit> {
        if self.exploding_cells.read().unwrap().contains(cell) {
            panic!("storage enumeration failed for {cell}");
        }

        let count = self.enumerations.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, load)) = *self.degrade.read().unwrap() {
            if count >= after {
                self.set_load(load);
            }
        }

        if !self.loaded.read().unwrap().contains(cell) {
            return Vec::new();
        }
        self.units
            .read()
            .unwrap()
            .get(cell)
            .cloned()
            .unwrap_or_default()
    }

    fn load_probe(&self) -> Option<Arc<dyn LoadProbe>> {
        if self.offers_probe.load(Ordering::SeqCst) {
            Some(Arc::new(SharedLoad(self.load.clone())))
        } else {
            None
        }
    }
}

/// Stand-in for the host's main loop: drains queued jobs every millisecond.
pub struct HostThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HostThread {
    pub fn spawn(world: Arc<FakeWorld>, mut pump: HostPump) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = stop.clone();
        let handle = std::thread::spawn(move || {
            while !stop_flag.load(Ordering::SeqCst) {
                pump.run_pending(world.as_ref(), 64);
                std::thread::sleep(Duration::from_millis(1));
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct Goods {
    pub registry: Arc<GoodRegistry>,
    pub iron: GoodId,
    pub wheat: GoodId,
    pub oak_log: GoodId,
    pub shulker_box: GoodId,
}

pub fn goods() -> Goods {
    let registry = GoodRegistry::from_names(["iron_ingot", "wheat", "oak_log", "shulker_box"]);
    Goods {
        iron: registry.id_of("iron_ingot").unwrap(),
        wheat: registry.id_of("wheat").unwrap(),
        oak_log: registry.id_of("oak_log").unwrap(),
        shulker_box: registry.id_of("shulker_box").unwrap(),
        registry: Arc::new(registry),
    }
}

pub fn test_config() -> CensusConfig {
    CensusConfig::new()
        .scan_interval_secs(3_600)
        .batch_delay_ms(0)
        .host_call_timeout_ms(1_000)
        .full_rescan_every_cycles(1_000)
        .persistence(false, PathBuf::new())
}

pub struct Fixture {
    pub service: CensusService,
    pub world: Arc<FakeWorld>,
    pub feed: Arc<LocalChangeFeed>,
    pub goods: Goods,
    _host: Option<HostThread>,
}

impl Fixture {
    pub fn new(config: CensusConfig) -> Self {
        let (handle, pump) = host_channel();
        let world = FakeWorld::new();
        let host = HostThread::spawn(world.clone(), pump);
        Self::assemble(config, handle, world, Some(host))
    }

    /// A fixture whose host never runs queued jobs.
    pub fn unpumped(config: CensusConfig) -> (Self, HostPump) {
        let (handle, pump) = host_channel();
        let fixture = Self::assemble(config, handle, FakeWorld::new(), None);
        (fixture, pump)
    }

    fn assemble(
        config: CensusConfig,
        handle: HostHandle,
        world: Arc<FakeWorld>,
        host: Option<HostThread>,
    ) -> Self {
        let goods = goods();
        let feed = Arc::new(LocalChangeFeed::new());
        let service =
            CensusService::new(config, handle, feed.clone(), goods.registry.clone()).unwrap();
        Self {
            service,
            world,
            feed,
            goods,
            _host: host,
        }
    }
}

pub fn at(x: i32, z: i32) -> BlockPos {
    BlockPos::new(REALM, x, 64, z)
}

pub fn cell(x: i32, z: i32) -> CellKey {
    CellKey::new(REALM, x, z)
}

pub fn chest(pos: BlockPos, contents: Vec<ItemStack>) -> StorageUnit {
    StorageUnit::new(pos, "chest", contents)
}

pub async fn wait_until<F>(ceiling: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + ceiling;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

//! The pool manager.
//!
//! Owns a fixed array of slots. A request key is hashed to a slot; an
//! empty slot triggers one provisioning round covering every empty slot,
//! and concurrent requests wait on the per-slot placeholder instead of
//! starting their own round. A single idle timer, reset on every resolve,
//! tears the whole pool down when traffic stops.

use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use hive_cloud::{CloudError, Droplet, DropletConfig, Provisioner};
use hive_core::{HiveConfig, ImageRef, ReclaimStrategy, RetryPolicy, RouteHasher};
use hive_drone::{Drone, ReadinessProbe};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{HiveError, HiveResult};
use crate::resolver::TargetResolver;
use crate::timer::{BoxFuture, IdleTimer};

/// Name given to every provisioned droplet.
pub const DROPLET_NAME: &str = "hive-drone";

/// Result cell shared by everyone waiting on one slot of a round.
type Placeholder = watch::Receiver<Option<HiveResult<Arc<Drone>>>>;
type Completer = watch::Sender<Option<HiveResult<Arc<Drone>>>>;

enum Slot {
    Empty,
    Pending(Placeholder),
    Ready(Arc<Drone>),
}

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Pending,
    Ready,
}

struct Inner<P, R> {
    config: HiveConfig,
    provider: P,
    probe: R,
    hasher: RouteHasher,
    slots: Mutex<Vec<Slot>>,
    /// Resolved by `init`: key id and image.
    droplet_config: RwLock<Option<DropletConfig>>,
    timer: IdleTimer,
    rounds: AtomicU64,
    /// Set by `destroy`, under the slots lock.
    destroyed: AtomicBool,
}

/// The pool manager. Cheap to clone; clones share one pool.
pub struct Hive<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for Hive<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: Provisioner, R: ReadinessProbe> Hive<P, R> {
    /// Create a pool with a randomly seeded routing hash.
    pub fn new(config: HiveConfig, provider: P, probe: R) -> HiveResult<Self> {
        Self::with_hasher(config, provider, probe, RouteHasher::random())
    }

    pub fn with_hasher(
        config: HiveConfig,
        provider: P,
        probe: R,
        hasher: RouteHasher,
    ) -> HiveResult<Self> {
        config
            .validate()
            .map_err(|e| HiveError::Config(e.to_string()))?;

        let slots = (0..config.pool_size).map(|_| Slot::Empty).collect();
        let inner = Arc::new_cyclic(|weak: &Weak<Inner<P, R>>| {
            let weak = weak.clone();
            Inner {
                config,
                provider,
                probe,
                hasher,
                slots: Mutex::new(slots),
                droplet_config: RwLock::new(None),
                timer: IdleTimer::new(Arc::new(move || {
                    let weak = weak.clone();
                    Box::pin(async move {
                        if let Some(inner) = weak.upgrade() {
                            inner.reclaim();
                        }
                    }) as BoxFuture
                })),
                rounds: AtomicU64::new(0),
                destroyed: AtomicBool::new(false),
            }
        });

        Ok(Self { inner })
    }

    /// Remove leftovers from a previous run and resolve the SSH key and
    /// image used for new droplets.
    pub async fn init(&self) -> HiveResult<()> {
        let cloud = &self.inner.config.cloud;
        let provider = &self.inner.provider;

        info!(tag = %cloud.tag, "deleting old droplets");
        provider.delete_droplets_by_tag(&cloud.tag).await?;

        debug!("fetching ssh keys");
        let keys = provider.list_ssh_keys().await?;
        let key = keys
            .iter()
            .find(|key| key.name == cloud.ssh_key_name)
            .ok_or_else(|| HiveError::SshKeyNotFound(cloud.ssh_key_name.clone()))?;
        debug!(ssh_key_id = key.id, "got ssh key id");

        let image = match &cloud.image {
            ImageRef::Id(id) => ImageRef::Id(*id),
            ImageRef::Name(name) => {
                debug!("fetching user images");
                let images = provider.list_user_images().await?;
                match images.iter().find(|image| &image.name == name) {
                    Some(image) => {
                        debug!(image_id = image.id, "found image");
                        ImageRef::Id(image.id)
                    }
                    None => {
                        debug!(%name, "no image with this name, using as slug");
                        ImageRef::Name(name.clone())
                    }
                }
            }
        };

        let droplet_config = DropletConfig {
            region: cloud.region.clone(),
            size: cloud.size.clone(),
            image,
            ssh_keys: vec![key.id],
            tags: vec![cloud.tag.clone()],
        };
        info!(image = %droplet_config.image, pool_size = self.inner.config.pool_size, "hive initialized");
        *self.inner.droplet_config.write().expect("droplet config lock") = Some(droplet_config);

        Ok(())
    }

    /// Resolve the drone base URL serving `key`, provisioning if needed.
    pub async fn resolve_target(&self, key: &str) -> HiveResult<String> {
        let index = self.slot_for(key);
        debug!(%key, slot = index, "resolving target");

        // Any access postpones reclamation.
        self.refresh();
        let drone = self.acquire(index).await?;
        // Provisioning may have taken longer than the idle timeout.
        self.refresh();

        Ok(drone.url()?)
    }

    /// Delete every droplet in the pool's tag and stop the idle timer.
    ///
    /// The pool stays unusable afterwards: new requests fail with
    /// `Destroyed`, and rounds still in flight delete what they created.
    pub async fn destroy(&self) -> HiveResult<()> {
        {
            let mut slots = self.inner.slots.lock().expect("slots lock");
            self.inner.destroyed.store(true, Ordering::SeqCst);
            for slot in slots.iter_mut().filter(|s| matches!(s, Slot::Ready(_))) {
                *slot = Slot::Empty;
            }
        }
        self.inner.timer.cancel();

        info!(tag = %self.inner.config.cloud.tag, "deleting droplets");
        self.inner
            .provider
            .delete_droplets_by_tag(&self.inner.config.cloud.tag)
            .await?;
        Ok(())
    }

    /// Slot index that `key` routes to.
    pub fn slot_for(&self, key: &str) -> usize {
        self.inner.hasher.slot(key, self.inner.config.pool_size)
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        let slots = self.inner.slots.lock().expect("slots lock");
        slots
            .iter()
            .map(|slot| match slot {
                Slot::Empty => SlotState::Empty,
                Slot::Pending(_) => SlotState::Pending,
                Slot::Ready(_) => SlotState::Ready,
            })
            .collect()
    }

    /// Number of provisioning rounds started so far.
    pub fn provisioning_rounds(&self) -> u64 {
        self.inner.rounds.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &HiveConfig {
        &self.inner.config
    }

    fn refresh(&self) {
        self.inner.refresh();
    }

    async fn acquire(&self, index: usize) -> HiveResult<Arc<Drone>> {
        let mut placeholder = {
            let mut slots = self.inner.slots.lock().expect("slots lock");
            if matches!(slots[index], Slot::Empty) {
                self.inner.start_round(&mut slots)?;
            }
            match &slots[index] {
                Slot::Ready(drone) => {
                    debug!(slot = index, "drone exists");
                    return Ok(drone.clone());
                }
                Slot::Pending(placeholder) => placeholder.clone(),
                Slot::Empty => return Err(HiveError::RoundAborted),
            }
        };

        debug!(slot = index, "waiting for provisioning round");
        let outcome = placeholder
            .wait_for(Option::is_some)
            .await
            .map_err(|_| HiveError::RoundAborted)?
            .clone();

        outcome.unwrap_or(Err(HiveError::RoundAborted))
    }
}

impl<P: Provisioner, R: ReadinessProbe> Inner<P, R> {
    /// Mark every empty slot `Pending` and spawn the round that fills them.
    ///
    /// Runs under the slots lock, so no other resolver can observe an
    /// empty slot between the check and the claim.
    fn start_round(self: &Arc<Self>, slots: &mut [Slot]) -> HiveResult<()> {
        if self.is_destroyed() {
            return Err(HiveError::Destroyed);
        }
        let droplet_config = self
            .droplet_config
            .read()
            .expect("droplet config lock")
            .clone()
            .ok_or(HiveError::NotInitialized)?;

        let mut indices = Vec::new();
        let mut completers = Vec::new();
        for (index, slot) in slots.iter_mut().enumerate() {
            if matches!(slot, Slot::Empty) {
                let (tx, rx) = watch::channel(None);
                *slot = Slot::Pending(rx);
                indices.push(index);
                completers.push(tx);
            }
        }

        let round = self.rounds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(round, drones = indices.len(), "creating new drones");

        tokio::spawn(self.clone().run_round(round, indices, completers, droplet_config));
        Ok(())
    }

    async fn run_round(
        self: Arc<Self>,
        round: u64,
        indices: Vec<usize>,
        completers: Vec<Completer>,
        droplet_config: DropletConfig,
    ) {
        let names = vec![DROPLET_NAME.to_string(); indices.len()];
        let droplets = match self.provider.create_droplets(&names, &droplet_config).await {
            Ok(droplets) if self.is_destroyed() => {
                self.fail_round(round, &indices, &completers, HiveError::Destroyed);
                self.abandon(&droplets).await;
                return;
            }
            Ok(droplets) if droplets.len() >= indices.len() => droplets,
            Ok(droplets) => {
                let err = CloudError::ShortBatch {
                    requested: indices.len(),
                    created: droplets.len(),
                };
                self.fail_round(round, &indices, &completers, err.into());
                self.abandon(&droplets).await;
                return;
            }
            Err(e) => {
                self.fail_round(round, &indices, &completers, e.into());
                return;
            }
        };

        let policy = RetryPolicy::drone_probe().with_max_attempts(self.config.worker.probe_attempts);
        let port = self.config.worker.port;
        let drones: Vec<Arc<Drone>> = droplets
            .into_iter()
            .take(indices.len())
            .map(|droplet| Arc::new(Drone::new(droplet, port).with_policy(policy)))
            .collect();

        let mut readiness = JoinSet::new();
        for (pos, drone) in drones.iter().enumerate() {
            let inner = self.clone();
            let drone = drone.clone();
            let slot = indices[pos];
            readiness.spawn(async move {
                debug!(slot, droplet_id = drone.droplet().id(), "initializing drone");
                (pos, drone.init(&inner.probe).await)
            });
        }

        while let Some(joined) = readiness.join_next().await {
            let failure = match joined {
                Ok((pos, Ok(()))) => self.fill_slot(indices[pos], &drones[pos], &completers[pos]),
                Ok((pos, Err(e))) => {
                    warn!(slot = indices[pos], error = %e, "drone failed to become ready");
                    Some(HiveError::from(e))
                }
                Err(e) => {
                    warn!(error = %e, "drone readiness task failed");
                    Some(HiveError::RoundAborted)
                }
            };

            // One failed drone fails the whole round.
            if let Some(err) = failure {
                readiness.abort_all();
                self.fail_round(round, &indices, &completers, err);
                let droplets: Vec<Droplet> = drones.iter().map(|d| d.droplet().clone()).collect();
                self.abandon(&droplets).await;
                return;
            }
        }

        info!(round, "provisioning round finished");
    }

    /// Mark a slot `Ready` and wake its waiters, unless the pool was
    /// destroyed in the meantime.
    fn fill_slot(&self, index: usize, drone: &Arc<Drone>, completer: &Completer) -> Option<HiveError> {
        {
            let mut slots = self.slots.lock().expect("slots lock");
            if self.is_destroyed() {
                return Some(HiveError::Destroyed);
            }
            slots[index] = Slot::Ready(drone.clone());
        }
        debug!(slot = index, droplet_id = drone.droplet().id(), "drone ready");
        completer.send_replace(Some(Ok(drone.clone())));
        None
    }

    /// Best-effort deletion of droplets from a round that did not complete.
    async fn abandon(&self, droplets: &[Droplet]) {
        for droplet in droplets {
            if let Err(e) = droplet.delete(&self.provider).await {
                warn!(droplet_id = droplet.id(), error = %e, "abandoned drone delete error");
            }
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn refresh(&self) {
        if !self.is_destroyed() {
            self.timer.reset(self.config.worker.idle_timeout());
        }
    }

    /// Return the round's slots to `Empty` and hand `err` to every waiter.
    fn fail_round(&self, round: u64, indices: &[usize], completers: &[Completer], err: HiveError) {
        error!(round, error = %err, "provisioning round failed");
        {
            let mut slots = self.slots.lock().expect("slots lock");
            for &index in indices {
                slots[index] = Slot::Empty;
            }
        }
        for completer in completers {
            completer.send_replace(Some(Err(err.clone())));
        }
    }

    /// Idle expiry: empty every slot and delete droplets in the background.
    fn reclaim(self: Arc<Self>) {
        let drones: Vec<Arc<Drone>> = {
            let mut slots = self.slots.lock().expect("slots lock");
            if self.is_destroyed() {
                return;
            }
            if slots.iter().any(|s| matches!(s, Slot::Pending(_))) {
                // Check again later; the round may finish with no resolver
                // left to reset the timer. This is the timer task's last
                // step, so re-arming here does not cancel anything pending.
                debug!("timed out during provisioning, keeping drones");
                self.refresh();
                return;
            }
            slots
                .iter_mut()
                .filter_map(|slot| match mem::replace(slot, Slot::Empty) {
                    Slot::Ready(drone) => Some(drone),
                    _ => None,
                })
                .collect()
        };

        info!(drones = drones.len(), "timed out, delete all drones");
        tokio::spawn(async move { self.teardown(drones).await });
    }

    /// Best-effort deletion; failures are logged only.
    async fn teardown(&self, drones: Vec<Arc<Drone>>) {
        match self.config.cloud.reclaim {
            ReclaimStrategy::Tag => {
                if let Err(e) = self.provider.delete_droplets_by_tag(&self.config.cloud.tag).await {
                    warn!(error = %e, "timeout drone delete error");
                }
            }
            ReclaimStrategy::Tracked => {
                for drone in &drones {
                    if let Err(e) = drone.delete(&self.provider).await {
                        warn!(droplet_id = drone.droplet().id(), error = %e, "timeout drone delete error");
                    }
                }
            }
        }
    }
}

impl<P: Provisioner, R: ReadinessProbe> TargetResolver for Hive<P, R> {
    async fn resolve_target(&self, key: &str) -> HiveResult<String> {
        Hive::resolve_target(self, key).await
    }
}

#[cfg(test)]
mod tests {
    use hive_core::{CloudConfig, Provider, WorkerConfig};

    use super::*;

    struct NoCloud;

    impl Provisioner for NoCloud {
        async fn create_droplets(&self, _: &[String], _: &DropletConfig) -> hive_cloud::CloudResult<Vec<hive_cloud::Droplet>> {
            Ok(vec![])
        }
        async fn retrieve_droplet(&self, _: u64) -> hive_cloud::CloudResult<hive_cloud::DropletResponse> {
            unreachable!()
        }
        async fn delete_droplet(&self, _: u64) -> hive_cloud::CloudResult<()> {
            Ok(())
        }
        async fn delete_droplets_by_tag(&self, _: &str) -> hive_cloud::CloudResult<()> {
            Ok(())
        }
        async fn list_ssh_keys(&self) -> hive_cloud::CloudResult<Vec<hive_cloud::SshKey>> {
            Ok(vec![hive_cloud::SshKey {
                id: 1,
                name: "main".into(),
                fingerprint: "aa".into(),
                public_key: String::new(),
            }])
        }
        async fn list_user_images(&self) -> hive_cloud::CloudResult<Vec<hive_cloud::Image>> {
            Ok(vec![])
        }
    }

    struct AlwaysUp;

    impl ReadinessProbe for AlwaysUp {
        async fn probe(&self, _: &str) -> hive_drone::ProbeResult {
            hive_drone::ProbeResult::Healthy
        }
    }

    fn config(pool_size: usize) -> HiveConfig {
        HiveConfig {
            pool_size,
            listen_host: "127.0.0.1".into(),
            listen_port: 0,
            cloud: CloudConfig {
                provider: Provider::DigitalOcean,
                region: "nyc1".into(),
                size: "s-1vcpu-1gb".into(),
                image: ImageRef::Id(1),
                ssh_key_name: "main".into(),
                tag: "unit".into(),
                auth_token: None,
                api_url: None,
                poll_attempts: None,
                reclaim: ReclaimStrategy::Tag,
            },
            worker: WorkerConfig::default(),
        }
    }

    #[test]
    fn new_pool_is_empty() {
        let hive = Hive::with_hasher(config(3), NoCloud, AlwaysUp, RouteHasher::with_seed(1)).unwrap();
        assert_eq!(hive.slot_states(), vec![SlotState::Empty; 3]);
        assert_eq!(hive.provisioning_rounds(), 0);
    }

    #[test]
    fn zero_sized_pool_rejected() {
        let err = Hive::new(config(0), NoCloud, AlwaysUp).err().unwrap();
        assert!(matches!(err, HiveError::Config(_)));
    }

    #[test]
    fn slot_for_matches_hasher() {
        let hasher = RouteHasher::with_seed(99);
        let hive = Hive::with_hasher(config(5), NoCloud, AlwaysUp, hasher).unwrap();
        for key in ["/", "/a", "/b/c?d=e"] {
            assert_eq!(hive.slot_for(key), hasher.slot(key, 5));
        }
    }

    #[tokio::test]
    async fn resolve_before_init_fails_and_leaves_slots_empty() {
        let hive = Hive::with_hasher(config(2), NoCloud, AlwaysUp, RouteHasher::with_seed(1)).unwrap();

        let err = hive.resolve_target("/a").await.unwrap_err();

        assert_eq!(err, HiveError::NotInitialized);
        assert_eq!(hive.slot_states(), vec![SlotState::Empty; 2]);
        hive.destroy().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn short_batch_fails_round() {
        let hive = Hive::with_hasher(config(2), NoCloud, AlwaysUp, RouteHasher::with_seed(1)).unwrap();
        hive.init().await.unwrap();

        let err = hive.resolve_target("/a").await.unwrap_err();

        assert_eq!(
            err,
            HiveError::Cloud(CloudError::ShortBatch {
                requested: 2,
                created: 0
            })
        );
        assert_eq!(hive.slot_states(), vec![SlotState::Empty; 2]);
    }
}

use async_stream::stream;
use basalt_sdk::prelude::*;
use basalt_sdk::{Event, RebaseConfigBuilder};
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Statistics collected during a simulation run
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub num_devices: usize,
    pub commits_per_device: usize,
    pub total_commits: usize,
    pub total_syncs: usize,
    pub rebases: u64,
    pub no_ops: u64,
    pub events_merged: u64,
    pub identifiers_collected: u64,
    pub baselines_on_exchange: usize,
    pub events_on_exchange: usize,
    pub converged: bool,
    pub total_time: Duration,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Number of Devices:         {:>30} ║", self.num_devices);
        println!("║  Commits per Device:        {:>30} ║", self.commits_per_device);
        println!("║  Total Commits:             {:>30} ║", self.total_commits);
        println!("║  Total Sync Operations:     {:>30} ║", self.total_syncs);
        println!("║  Rebases (no-ops):          {:>30} ║", format!("{} ({})", self.rebases, self.no_ops));
        println!("║  Events Merged:             {:>30} ║", self.events_merged);
        println!("║  Identifiers Collected:     {:>30} ║", self.identifiers_collected);
        println!("║  Exchange Events/Baselines: {:>30} ║", format!("{}/{}", self.events_on_exchange, self.baselines_on_exchange));
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

/// One step a device takes after the initial burst of local work.
#[derive(Clone, Copy, Debug)]
enum Activity {
    Commit(usize),
    Sync(usize),
    Maintain(usize),
}

/// Generator that yields device activity in random order
fn device_activity_generator(num_devices: usize, steps: usize, seed: u64) -> impl Stream<Item = Activity> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..steps {
            let device = rng.gen_range(0..num_devices);
            yield match rng.gen_range(0..10) {
                0..=4 => Activity::Commit(device),
                5..=8 => Activity::Sync(device),
                _ => Activity::Maintain(device),
            };
        }
    }
}

/// Local object keys a device knows it created.
struct Workload {
    device: usize,
    rng: StdRng,
    next_key: usize,
    live: Vec<GlobalIdentifier>,
}

impl Workload {
    fn new(device: usize, seed: u64) -> Self {
        Self {
            device,
            rng: StdRng::seed_from_u64(seed.wrapping_add(device as u64)),
            next_key: 0,
            live: Vec::new(),
        }
    }

    /// Pick the next local change: mostly inserts and updates, some deletes.
    async fn step(&mut self, device: &Device) -> basalt_sdk::Result<Event> {
        let roll = self.rng.gen_range(0..10);
        if self.live.is_empty() || roll < 4 {
            let id = GlobalIdentifier::new("Note", format!("d{}-{}", self.device, self.next_key));
            self.next_key += 1;
            self.live.push(id.clone());
            device.insert(id, &[("title", json!(format!("draft {}", self.next_key)))]).await
        } else if roll < 9 {
            let id = self.live[self.rng.gen_range(0..self.live.len())].clone();
            let revision: u32 = self.rng.gen();
            device.update(id, &[("title", json!(format!("rev {revision}")))]).await
        } else {
            let id = self.live.swap_remove(self.rng.gen_range(0..self.live.len()));
            device.delete(id).await
        }
    }
}

/// Run `num_devices` devices against one exchange, then let them settle.
pub async fn run_simulation(
    num_devices: usize,
    commits_per_device: usize,
    num_steps: usize,
    seed: u64,
) -> basalt_sdk::Result<SimulationStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Multi-Device Rebase Simulation                      ║");
    println!("║  Devices: {} | Commits/Device: {} | Steps: {} ║",
             num_devices, commits_per_device, num_steps);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let exchange = MemoryExchange::new();
    let config = RebaseConfigBuilder::new()
        .min_changes_for_rebase(commits_per_device)
        .min_compaction_ratio(0.3)
        .build();

    let devices: Vec<Arc<Device>> = (0..num_devices)
        .map(|idx| Arc::new(Device::new(format!("device-{idx}"), SchemaFingerprint::default()).with_config(config.clone())))
        .collect();

    println!("\n[Phase 1/3] Committing local changes on every device...");

    // Phase 1: independent local work, one task per device
    let mut handles = vec![];
    for (idx, device) in devices.iter().enumerate() {
        let device = Arc::clone(device);
        let exchange = exchange.clone();
        let handle = tokio::spawn(async move {
            let mut workload = Workload::new(idx, seed);
            for i in 0..commits_per_device {
                workload.step(&device).await?;
                if i % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            device.leech(&exchange).await.map(|_| workload)
        });
        handles.push(handle);
    }

    let mut workloads = Vec::with_capacity(num_devices);
    for handle in handles {
        let workload = handle.await.map_err(|_| SdkError::TaskDropped)??;
        workloads.push(workload);
    }
    let mut total_commits = num_devices * commits_per_device;

    println!("[Phase 1/3] ✓ Completed");
    println!("[Phase 2/3] Interleaving commits, syncs and maintenance...");

    // Phase 2: random activity driven by a stream
    let mut activity = Box::pin(device_activity_generator(num_devices, num_steps, seed));
    let mut total_syncs = 0;
    while let Some(step) = activity.next().await {
        match step {
            Activity::Commit(idx) => {
                workloads[idx].step(&devices[idx]).await?;
                total_commits += 1;
            }
            Activity::Sync(idx) => {
                devices[idx].sync(&exchange).await?;
                total_syncs += 1;
                if total_syncs % 100 == 0 {
                    println!("  Syncs completed: {}", total_syncs);
                }
            }
            Activity::Maintain(idx) => {
                devices[idx].log().maintain().await?;
            }
        }
    }

    println!("[Phase 2/3] ✓ Completed");
    println!("[Phase 3/3] Settling: sync and rebase until quiet...");

    // Phase 3: everyone syncs and rebases a few rounds
    for _ in 0..3 {
        for device in &devices {
            device.sync(&exchange).await?;
            total_syncs += 1;
        }
        for device in &devices {
            device.rebase().await?;
            device.push(&exchange).await?;
        }
    }
    for device in &devices {
        device.pull(&exchange).await?;
    }

    let mut converged = true;
    if let Some((first, rest)) = devices.split_first() {
        let reference = first.objects().await?;
        for device in rest {
            converged &= device.objects().await? == reference;
        }
    }

    println!("[Phase 3/3] ✓ Completed");

    let mut stats = SimulationStats {
        num_devices,
        commits_per_device,
        total_commits,
        total_syncs,
        rebases: 0,
        no_ops: 0,
        events_merged: 0,
        identifiers_collected: 0,
        baselines_on_exchange: exchange.baseline_count(),
        events_on_exchange: exchange.len(),
        converged,
        total_time: start.elapsed(),
    };
    for device in &devices {
        let device_stats = device.log().stats();
        stats.rebases += device_stats.rebases;
        stats.no_ops += device_stats.no_ops;
        stats.events_merged += device_stats.events_merged;
        stats.identifiers_collected += device_stats.identifiers_collected;
    }
    Ok(stats)
}

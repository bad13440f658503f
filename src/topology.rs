//! NUMA layout of the machine and the grouping of workers into clusters.

use std::{collections::BTreeMap, fs, io, num::NonZeroUsize, path::Path, thread};

use log::{debug, warn};

use crate::error::{Result, SolverErr};

const SYSFS_NODES: &str = "/sys/devices/system/node";

/// The usable cores of every NUMA node, keyed by node id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaConfig {
    nodes: BTreeMap<usize, Vec<usize>>,
}

impl NumaConfig {
    /// Creates a new `NumaConfig` from an explicit node to cores mapping.
    pub fn new(nodes: BTreeMap<usize, Vec<usize>>) -> Self {
        Self { nodes }
    }

    /// A machine with a single node holding cores `0..cores`.
    pub fn single_node(cores: usize) -> Self {
        Self::new(BTreeMap::from([(0, (0..cores).collect())]))
    }

    /// Discovers the topology of the running machine.
    ///
    /// Reads the Linux sysfs node listing, falling back to a single node with as many
    /// cores as the available parallelism when it isn't there.
    pub fn detect() -> Self {
        match Self::from_sysfs(Path::new(SYSFS_NODES)) {
            Ok(config) if config.total_cores() > 0 => config,
            _ => {
                let cores = thread::available_parallelism().map_or(1, NonZeroUsize::get);
                debug!(cores = cores; "no NUMA layout found, assuming a single node");
                Self::single_node(cores)
            }
        }
    }

    /// Reads the `node*/cpulist` files under `root`.
    pub fn from_sysfs(root: &Path) -> io::Result<Self> {
        let mut nodes = BTreeMap::new();

        for entry in fs::read_dir(root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(id) = name
                .to_str()
                .and_then(|n| n.strip_prefix("node"))
                .and_then(|n| n.parse().ok())
            else {
                continue;
            };

            let cpulist = fs::read_to_string(entry.path().join("cpulist"))?;
            match parse_cpulist(&cpulist) {
                Some(cores) => {
                    nodes.insert(id, cores);
                }
                None => warn!(node = id; "unreadable cpulist `{}`", cpulist.trim()),
            }
        }

        Ok(Self::new(nodes))
    }

    pub fn nodes(&self) -> &BTreeMap<usize, Vec<usize>> {
        &self.nodes
    }

    pub fn total_cores(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    pub fn max_cores_per_node(&self) -> usize {
        self.nodes.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Iterates over every core, node by node.
    pub fn cores_in_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.nodes.values().flatten().copied()
    }

    /// Checks that `threads` workers fit in this topology.
    pub fn check_threads(&self, threads: usize) -> Result<()> {
        let available = self.total_cores();
        if available == 0 {
            return Err(SolverErr::EmptyTopology);
        }

        if threads > available {
            return Err(SolverErr::NotEnoughCores {
                requested: threads,
                available,
            });
        }

        Ok(())
    }
}

/// Parses a Linux cpu list such as `0-3,8,10-11`.
pub fn parse_cpulist(list: &str) -> Option<Vec<usize>> {
    let list = list.trim();
    if list.is_empty() {
        return Some(Vec::new());
    }

    let mut cores = Vec::new();
    for part in list.split(',') {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi): (usize, usize) = (lo.parse().ok()?, hi.parse().ok()?);
                cores.extend(lo..=hi);
            }
            None => cores.push(part.parse().ok()?),
        }
    }

    Some(cores)
}

/// Pins threads to cores. Implementations are platform specific.
pub trait CoreBinder: Send + Sync {
    /// Binds the calling thread to `core`.
    fn bind_current_thread(&self, core: usize);
}

/// A binder that leaves the OS scheduler in charge.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBinding;

impl CoreBinder for NoBinding {
    fn bind_current_thread(&self, _: usize) {}
}

/// Pins every worker to its core with `sched_setaffinity`.
///
/// Pinning is best effort: a core the process isn't allowed to run on is logged and
/// the worker keeps running wherever the scheduler puts it.
#[cfg(target_os = "linux")]
#[derive(Debug, Default, Clone, Copy)]
pub struct AffinityBinder;

#[cfg(target_os = "linux")]
impl CoreBinder for AffinityBinder {
    fn bind_current_thread(&self, core: usize) {
        match pin_current_thread(core) {
            Ok(()) => debug!(core = core; "worker pinned"),
            Err(e) => warn!(core = core; "could not pin worker: {e}"),
        }
    }
}

/// Restricts the calling thread to `core`.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core: usize) -> io::Result<()> {
    if core >= libc::CPU_SETSIZE as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("core {core} doesn't fit in a cpu set"),
        ));
    }

    // SAFETY: `set` is a zeroed `cpu_set_t`, `core` was checked to fit in it and its
    // exact size is passed along for the calling thread (pid 0).
    let result = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
    };

    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// The binder workers get unless told otherwise: `AffinityBinder` on Linux, no
/// pinning elsewhere.
pub fn default_binder() -> Box<dyn CoreBinder> {
    #[cfg(target_os = "linux")]
    {
        Box::new(AffinityBinder)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(NoBinding)
    }
}

/// A worker's place in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSlot {
    /// Global worker id, `0..threads`.
    pub worker: usize,
    /// The core the worker gets bound to.
    pub core: usize,
    /// The NUMA node owning `core`.
    pub node: usize,
}

/// Assigns `threads` workers to cores node by node, in node order.
pub fn assign_cores(threads: usize, numa: &NumaConfig) -> Result<Vec<WorkerSlot>> {
    numa.check_threads(threads)?;

    let slots = numa
        .nodes()
        .iter()
        .flat_map(|(&node, cores)| cores.iter().map(move |&core| (node, core)))
        .take(threads)
        .enumerate()
        .map(|(worker, (node, core))| WorkerSlot { worker, core, node })
        .collect();

    Ok(slots)
}

/// Groups `threads` workers into NUMA local clusters of at most `max_cluster_size`.
///
/// Workers fill the nodes in order. The `m` workers landing on a node are split into
/// `ceil(m / max_cluster_size)` clusters whose sizes differ by at most one. Worker ids
/// are unique and cover `0..threads`, and ids inside a cluster are consecutive.
///
/// # Returns
/// The clusters or a configuration error if the workers or the cluster size don't
/// fit in the topology.
pub fn extract_clusters(
    threads: usize,
    max_cluster_size: usize,
    numa: &NumaConfig,
) -> Result<Vec<Vec<WorkerSlot>>> {
    let slots = assign_cores(threads, numa)?;

    let max_per_node = numa.max_cores_per_node();
    if max_cluster_size == 0 || max_cluster_size > max_per_node {
        return Err(SolverErr::ClusterTooLarge {
            requested: max_cluster_size,
            max_per_node,
        });
    }

    let mut clusters = Vec::new();
    for node in numa.nodes().keys() {
        let local: Vec<WorkerSlot> = slots.iter().filter(|s| s.node == *node).copied().collect();
        if local.is_empty() {
            continue;
        }

        let count = local.len().div_ceil(max_cluster_size);
        for c in 0..count {
            let range = crate::data::shard_range(local.len(), c, count);
            clusters.push(local[range].to_vec());
        }
    }

    Ok(clusters)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn two_nodes() -> NumaConfig {
        NumaConfig::new(BTreeMap::from([(0, vec![0, 1, 2, 3]), (1, vec![4, 5, 6, 7])]))
    }

    #[test]
    fn parses_cpulists() {
        assert_eq!(parse_cpulist("0-3,8,10-11\n"), Some(vec![0, 1, 2, 3, 8, 10, 11]));
        assert_eq!(parse_cpulist(""), Some(vec![]));
        assert_eq!(parse_cpulist("a-b"), None);
    }

    #[test]
    fn clusters_partition_the_workers() {
        let numa = two_nodes();

        for threads in 1..=8 {
            for size in 1..=4 {
                let clusters = extract_clusters(threads, size, &numa).unwrap();

                let ids: Vec<usize> = clusters.iter().flatten().map(|s| s.worker).collect();
                let unique: HashSet<usize> = ids.iter().copied().collect();
                assert_eq!(ids.len(), threads);
                assert_eq!(unique, (0..threads).collect());

                for cluster in &clusters {
                    assert!(!cluster.is_empty() && cluster.len() <= size);
                    assert!(cluster.iter().all(|s| s.node == cluster[0].node));
                }

                for node in [0, 1] {
                    let sizes: Vec<usize> = clusters
                        .iter()
                        .filter(|c| c[0].node == node)
                        .map(Vec::len)
                        .collect();
                    if let (Some(min), Some(max)) = (sizes.iter().min(), sizes.iter().max()) {
                        assert!(max - min <= 1, "threads={threads} size={size} {sizes:?}");
                    }
                }
            }
        }
    }

    #[test]
    fn counts_cores() {
        let numa = NumaConfig::new(BTreeMap::from([(0, vec![0, 2]), (1, vec![1, 3, 5])]));

        assert_eq!(numa.total_cores(), 5);
        assert_eq!(numa.max_cores_per_node(), 3);
        assert_eq!(numa.cores_in_order().collect::<Vec<_>>(), [0, 2, 1, 3, 5]);

        let slots = assign_cores(3, &numa).unwrap();
        assert_eq!(slots[2], WorkerSlot { worker: 2, core: 1, node: 1 });
    }

    #[test]
    fn full_clusters_when_nodes_are_full() {
        let clusters = extract_clusters(8, 2, &two_nodes()).unwrap();
        assert_eq!(clusters.len(), 4);
        assert!(clusters.iter().all(|c| c.len() == 2));
    }

    #[test]
    fn rejects_invalid_configurations() {
        let numa = two_nodes();

        assert!(matches!(
            extract_clusters(9, 2, &numa),
            Err(SolverErr::NotEnoughCores {
                requested: 9,
                available: 8
            })
        ));
        assert!(matches!(
            extract_clusters(4, 5, &numa),
            Err(SolverErr::ClusterTooLarge { .. })
        ));
        assert!(matches!(
            extract_clusters(4, 0, &numa),
            Err(SolverErr::ClusterTooLarge { .. })
        ));
        assert!(matches!(
            extract_clusters(1, 1, &NumaConfig::new(BTreeMap::new())),
            Err(SolverErr::EmptyTopology)
        ));
    }

    #[test]
    fn detect_finds_cores() {
        assert!(NumaConfig::detect().total_cores() > 0);
    }

    #[cfg(target_os = "linux")]
    fn allowed_cores() -> Vec<usize> {
        // SAFETY: `set` is a zeroed `cpu_set_t` of the size passed along.
        unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            let size = std::mem::size_of::<libc::cpu_set_t>();
            let result = libc::sched_getaffinity(0, size, &mut set);
            assert_eq!(result, 0, "{}", io::Error::last_os_error());

            (0..libc::CPU_SETSIZE as usize)
                .filter(|&core| libc::CPU_ISSET(core, &set))
                .collect()
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn affinity_binder_pins_the_calling_thread() {
        thread::spawn(|| {
            let core = *allowed_cores().last().unwrap();
            AffinityBinder.bind_current_thread(core);
            assert_eq!(allowed_cores(), [core]);
        })
        .join()
        .unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinning_to_a_missing_core_fails_softly() {
        thread::spawn(|| {
            let before = allowed_cores();
            assert!(pin_current_thread(usize::MAX).is_err());

            AffinityBinder.bind_current_thread(usize::MAX);
            assert_eq!(allowed_cores(), before);
        })
        .join()
        .unwrap();
    }
}

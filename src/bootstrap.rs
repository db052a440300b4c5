//! # Ad-hoc Bootstrap Seeding
//!
//! With no directory service to ask, a node can still find peers on its own
//! network segment by probing addresses in its subnet. [`ProbeSeeder`] turns a
//! [`Subnet`] into an endless stream of candidate host addresses for the
//! connection logic to try.
//!
//! ## Sampling
//!
//! Candidates are drawn uniformly at random from the host range (network and
//! broadcast addresses excluded), not scanned in order. Repeats are expected.
//! A /31 or /32 has no host range; the seeder for such a subnet is valid but
//! never produces anything.
//!
//! ## Phases
//!
//! The caller passes a shared phase counter to [`ProbeSeeder::start`]. Each
//! [`Seed`] is tagged with the phase current at generation time, and the phase
//! also selects the pacing: phase 0 uses `fast_interval`, later phases
//! `slow_interval` (see [`SeederConfig`]).
//!
//! ## Lifecycle
//!
//! `new` → `start` → `close`, each step at most once. Misordered calls fail.
//! Seeds move through [`seed_channel`], which has no buffer, so after `close`
//! returns the receiver gets nothing but `None`.

use std::fmt;
use std::mem;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, Instrument, Span};

use crate::config::SeederConfig;
use crate::peer::raised;

/// An IPv4 network: base address plus prefix length.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Subnet {
    /// Build a subnet from any address inside it. Host bits of `addr` are
    /// cleared.
    ///
    /// # Errors
    /// Fails for IPv6 addresses, the unspecified address and prefixes over 32.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        let IpAddr::V4(v4) = addr else {
            bail!("cannot probe non-IPv4 network {}", addr);
        };
        if v4.is_unspecified() {
            bail!("subnet base address is unspecified");
        }
        if prefix_len > 32 {
            bail!("invalid IPv4 prefix length /{}", prefix_len);
        }
        let network = Ipv4Addr::from(u32::from(v4) & prefix_mask(prefix_len));
        Ok(Self { network, prefix_len })
    }

    /// Build a subnet from an address and a dotted netmask.
    ///
    /// # Errors
    /// Fails like [`Subnet::new`], and for netmasks whose one bits are not
    /// contiguous.
    pub fn with_mask(addr: IpAddr, mask: Ipv4Addr) -> Result<Self> {
        let bits = u32::from(mask);
        let ones = bits.leading_ones();
        if ones + bits.trailing_zeros() != 32 {
            bail!("malformed netmask {}", mask);
        }
        Self::new(addr, ones as u8)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !prefix_mask(self.prefix_len))
    }

    /// Number of usable host addresses: all addresses minus network and
    /// broadcast. Zero for /31 and /32.
    pub fn host_space(&self) -> u64 {
        let size = 1u64 << (32 - u32::from(self.prefix_len));
        size.saturating_sub(2)
    }

    /// True if `ip` falls anywhere in the subnet, network and broadcast
    /// included.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & prefix_mask(self.prefix_len) == u32::from(self.network)
    }

    /// True if `ip` is a usable host address of the subnet.
    pub fn is_host(&self, ip: Ipv4Addr) -> bool {
        self.host_space() > 0
            && self.contains(ip)
            && ip != self.network
            && ip != self.broadcast()
    }

    /// Draw one host address uniformly, or `None` if there are no hosts.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Option<Ipv4Addr> {
        let hosts = self.host_space();
        if hosts == 0 {
            return None;
        }
        let offset = rng.gen_range(1..=hosts) as u32;
        Some(Ipv4Addr::from(u32::from(self.network) + offset))
    }
}

fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        len => u32::MAX << (32 - u32::from(len)),
    }
}

impl FromStr for Subnet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr_part, len_part) = s
            .split_once('/')
            .context("subnet must be in CIDR form (format: ADDR/PREFIX)")?;
        let addr: IpAddr = addr_part.parse().context("invalid subnet address")?;
        let prefix_len: u8 = len_part.parse().context("invalid subnet prefix length")?;
        Self::new(addr, prefix_len)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// A candidate peer address and the discovery phase it was produced in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Seed {
    pub addr: IpAddr,
    pub phase: u32,
}

/// Handoff channel between a [`ProbeSeeder`] and its consumer.
///
/// There is no buffer: every [`SeedReceiver::recv`] posts a reply slot and the
/// producer fills it directly. A seed is only ever produced for a reader that
/// is waiting, so nothing is left behind to read once the producer stops.
pub fn seed_channel() -> (SeedSink, SeedReceiver) {
    let (requests_tx, requests_rx) = mpsc::channel(1);
    (
        SeedSink {
            requests: requests_rx,
        },
        SeedReceiver {
            requests: requests_tx,
        },
    )
}

/// Producer half of [`seed_channel`], handed to [`ProbeSeeder::start`].
#[derive(Debug)]
pub struct SeedSink {
    requests: mpsc::Receiver<oneshot::Sender<Seed>>,
}

/// Consumer half of [`seed_channel`].
#[derive(Debug)]
pub struct SeedReceiver {
    requests: mpsc::Sender<oneshot::Sender<Seed>>,
}

impl SeedReceiver {
    /// Wait for the next seed. Returns `None` once the producer has stopped,
    /// and never yields a seed generated after that.
    ///
    /// Cancel safe: a reader that gives up before its slot is filled loses
    /// nothing, the producer offers the seed to the next reader.
    pub async fn recv(&mut self) -> Option<Seed> {
        let (reply, slot) = oneshot::channel();
        self.requests.send(reply).await.ok()?;
        slot.await.ok()
    }
}

enum SeederState {
    Idle,
    Running(JoinHandle<()>),
    Closed,
}

/// Random-probing seed generator for one subnet.
pub struct ProbeSeeder {
    subnet: Subnet,
    config: SeederConfig,
    span: Span,
    quit: watch::Sender<bool>,
    state: SeederState,
}

impl ProbeSeeder {
    /// # Errors
    /// Fails if `config` is inconsistent.
    pub fn new(subnet: Subnet, config: SeederConfig) -> Result<Self> {
        config.validate().context("invalid seeder configuration")?;
        let (quit, _) = watch::channel(false);
        Ok(Self {
            subnet,
            config,
            span: info_span!("probe", subnet = %subnet),
            quit,
            state: SeederState::Idle,
        })
    }

    pub fn subnet(&self) -> &Subnet {
        &self.subnet
    }

    /// Start handing seeds to `sink`'s receiver. Must be called from within a
    /// tokio runtime.
    ///
    /// # Errors
    /// Fails if the seeder was already started or closed.
    pub fn start(&mut self, sink: SeedSink, phase: Arc<AtomicU32>) -> Result<()> {
        match self.state {
            SeederState::Idle => {}
            SeederState::Running(_) => bail!("probe seeder for {} already started", self.subnet),
            SeederState::Closed => bail!("probe seeder for {} already closed", self.subnet),
        }
        let producer = probe(
            self.subnet,
            self.config.clone(),
            sink,
            phase,
            self.quit.subscribe(),
        );
        let task = tokio::spawn(producer.instrument(self.span.clone()));
        self.state = SeederState::Running(task);

        self.span.in_scope(|| info!(hosts = self.subnet.host_space(), "probe seeder started"));
        Ok(())
    }

    /// Stop producing and wait for the producer to exit. Once this returns no
    /// further seed is handed over; the receiver only sees `None` from then on.
    ///
    /// # Errors
    /// Fails if the seeder was never started or is already closed.
    pub async fn close(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, SeederState::Closed) {
            SeederState::Idle => {
                self.state = SeederState::Idle;
                bail!("probe seeder for {} was never started", self.subnet)
            }
            SeederState::Closed => bail!("probe seeder for {} already closed", self.subnet),
            SeederState::Running(task) => {
                self.quit.send_replace(true);
                task.await.context("probe seeder task failed")?;
                self.span.in_scope(|| info!("probe seeder closed"));
                Ok(())
            }
        }
    }
}

async fn probe(
    subnet: Subnet,
    config: SeederConfig,
    mut sink: SeedSink,
    phase: Arc<AtomicU32>,
    quit: watch::Receiver<bool>,
) {
    if subnet.host_space() == 0 {
        debug!("empty host space, nothing to probe");
        raised(quit).await;
        return;
    }

    let mut rng = StdRng::from_entropy();
    loop {
        let current = phase.load(Ordering::Relaxed);
        let pause = config.interval_for(current);
        if !pause.is_zero() {
            tokio::select! {
                _ = raised(quit.clone()) => return,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        let Some(host) = subnet.sample(&mut rng) else {
            return;
        };
        let mut seed = Seed {
            addr: IpAddr::V4(host),
            phase: current,
        };
        loop {
            // Quit first: no handoff starts once close has been requested.
            let reply = tokio::select! {
                biased;
                _ = raised(quit.clone()) => return,
                reply = sink.requests.recv() => match reply {
                    Some(reply) => reply,
                    None => {
                        debug!("seed receiver dropped");
                        return;
                    }
                },
            };
            match reply.send(seed) {
                Ok(()) => break,
                // Reader gave up; keep the seed for the next one.
                Err(unclaimed) => seed = unclaimed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn subnet(s: &str) -> Subnet {
        s.parse().expect("subnet")
    }

    #[test]
    fn host_bits_are_cleared() {
        let net = subnet("192.168.0.100/24");
        assert_eq!(net.network(), Ipv4Addr::new(192, 168, 0, 0));
        assert_eq!(net.broadcast(), Ipv4Addr::new(192, 168, 0, 255));
        assert_eq!(net.to_string(), "192.168.0.0/24");
    }

    #[test]
    fn host_space_by_prefix() {
        assert_eq!(subnet("10.0.0.1/24").host_space(), 254);
        assert_eq!(subnet("10.0.0.1/30").host_space(), 2);
        assert_eq!(subnet("10.0.0.1/31").host_space(), 0);
        assert_eq!(subnet("10.0.0.1/32").host_space(), 0);
        assert_eq!(subnet("10.0.0.1/0").host_space(), (1u64 << 32) - 2);
    }

    #[test]
    fn invalid_subnets_rejected() {
        assert!("0.0.0.0/24".parse::<Subnet>().is_err());
        assert!("10.0.0.1/33".parse::<Subnet>().is_err());
        assert!("::1/64".parse::<Subnet>().is_err());
        assert!("10.0.0.1".parse::<Subnet>().is_err());
        assert!("10.0.0/24".parse::<Subnet>().is_err());
        assert!("10.0.0.1/x".parse::<Subnet>().is_err());
    }

    #[test]
    fn netmask_must_be_contiguous() {
        let addr: IpAddr = "172.16.5.9".parse().unwrap();
        let net = Subnet::with_mask(addr, Ipv4Addr::new(255, 255, 240, 0)).unwrap();
        assert_eq!(net.prefix_len(), 20);
        assert_eq!(net.network(), Ipv4Addr::new(172, 16, 0, 0));

        assert!(Subnet::with_mask(addr, Ipv4Addr::new(255, 0, 255, 0)).is_err());
    }

    #[test]
    fn host_membership_excludes_network_and_broadcast() {
        let net = subnet("192.168.0.100/30");
        assert!(!net.is_host(Ipv4Addr::new(192, 168, 0, 100)));
        assert!(net.is_host(Ipv4Addr::new(192, 168, 0, 101)));
        assert!(net.is_host(Ipv4Addr::new(192, 168, 0, 102)));
        assert!(!net.is_host(Ipv4Addr::new(192, 168, 0, 103)));
        assert!(!net.is_host(Ipv4Addr::new(192, 168, 0, 104)));
    }

    #[test]
    fn sampling_stays_in_host_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for prefix in 22..=30u8 {
            let net = Subnet::new("192.168.0.100".parse().unwrap(), prefix).unwrap();
            for _ in 0..2_000 {
                let host = net.sample(&mut rng).unwrap();
                assert!(net.is_host(host), "{} outside {}", host, net);
            }
        }
    }

    #[test]
    fn sampling_point_to_point_yields_nothing() {
        let mut rng = StdRng::seed_from_u64(7);
        assert!(subnet("192.168.0.100/31").sample(&mut rng).is_none());
        assert!(subnet("192.168.0.100/32").sample(&mut rng).is_none());
    }

    #[test]
    fn sampling_passes_chi_squared() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let net = subnet("10.1.2.3/24");
        let hosts = net.host_space() as usize;
        let draws = 200_000;

        let mut counts: HashMap<Ipv4Addr, usize> = HashMap::new();
        for _ in 0..draws {
            *counts.entry(net.sample(&mut rng).unwrap()).or_default() += 1;
        }
        assert_eq!(counts.len(), hosts);

        let expected = draws as f64 / hosts as f64;
        let chi2: f64 = counts
            .values()
            .map(|&c| {
                let d = c as f64 - expected;
                d * d / expected
            })
            .sum();
        // mean is df, variance 2 * df; six sigma is far outside chance
        let df = (hosts - 1) as f64;
        assert!(chi2 < df + 6.0 * (2.0 * df).sqrt(), "chi2 {} too high", chi2);
    }

    #[tokio::test]
    async fn lifecycle_misuse_is_rejected() {
        let mut seeder = ProbeSeeder::new(subnet("10.0.0.1/24"), SeederConfig::default()).unwrap();
        assert!(seeder.close().await.is_err());

        let (sink, _seeds) = seed_channel();
        let phase = Arc::new(AtomicU32::new(0));
        seeder.start(sink, phase.clone()).unwrap();
        assert!(seeder.start(seed_channel().0, phase.clone()).is_err());

        seeder.close().await.unwrap();
        assert!(seeder.close().await.is_err());
        assert!(seeder.start(seed_channel().0, phase).is_err());
    }

    #[tokio::test]
    async fn abandoned_read_does_not_lose_the_seed() {
        let mut seeder = ProbeSeeder::new(subnet("10.0.0.1/24"), SeederConfig::default()).unwrap();
        let (sink, mut seeds) = seed_channel();
        seeder.start(sink, Arc::new(AtomicU32::new(0))).unwrap();

        // A reader whose slot is dropped before it is filled.
        let (reply, slot) = oneshot::channel();
        seeds.requests.send(reply).await.unwrap();
        drop(slot);

        let seed = tokio::time::timeout(std::time::Duration::from_secs(2), seeds.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(subnet("10.0.0.1/24").is_host(match seed.addr {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => unreachable!(),
        }));

        seeder.close().await.unwrap();
        assert!(seeds.recv().await.is_none());
    }

    #[test]
    fn inconsistent_config_rejected() {
        let config = SeederConfig {
            fast_interval: std::time::Duration::from_secs(2),
            slow_interval: std::time::Duration::from_secs(1),
        };
        assert!(ProbeSeeder::new(subnet("10.0.0.1/24"), config).is_err());
    }
}

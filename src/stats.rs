//! Per-server counters and the end-of-run report.

use std::fmt;
use std::net::Ipv6Addr;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::Instant;

use crate::config::Exchange;
use crate::packet::Classification;
use crate::session::Phase;

/// Counters for one request/response round.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseStats {
    pub sent: u64,
    pub acked: u64,
    pub nacked: u64,
    pub timeouts: u64,
    pub latency_sum: Duration,
    pub latency_min: Option<Duration>,
    pub latency_max: Duration,
}

impl PhaseStats {
    pub fn replies(&self) -> u64 {
        self.acked + self.nacked
    }

    /// Mean latency over every ACK and NAK; zero when nothing was answered.
    pub fn average_latency(&self) -> Duration {
        let replies = u32::try_from(self.replies().max(1)).unwrap_or(u32::MAX);
        self.latency_sum / replies
    }

    fn record_latency(&mut self, latency: Duration) {
        self.latency_sum += latency;
        self.latency_max = self.latency_max.max(latency);
        self.latency_min = Some(match self.latency_min {
            Some(min) => min.min(latency),
            None => latency,
        });
    }
}

/// Everything counted for one server during a run.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    phases: [PhaseStats; 4],
    pub completed: u64,
    pub failed: u64,
    pub errors: u64,
    pub first_sent: Option<Instant>,
    pub last_sent: Option<Instant>,
    pub last_received: Option<Instant>,
}

impl Statistics {
    pub fn phase(&self, phase: Phase) -> &PhaseStats {
        &self.phases[phase.index()]
    }

    pub fn record_sent(&mut self, phase: Phase, now: Instant) {
        self.phases[phase.index()].sent += 1;
        self.first_sent.get_or_insert(now);
        self.last_sent = Some(now);
    }

    /// Counts an accepted server message. `latency` is measured from the
    /// phase's last send, when one is known.
    pub fn record_reply(
        &mut self,
        phase: Phase,
        classification: Classification,
        latency: Option<Duration>,
        now: Instant,
    ) {
        let stats = &mut self.phases[phase.index()];
        match classification {
            Classification::Ack => stats.acked += 1,
            Classification::Nak => stats.nacked += 1,
        }
        if let Some(latency) = latency {
            stats.record_latency(latency);
        }
        self.last_received = Some(now);
    }

    pub fn record_timeout(&mut self, phase: Phase) {
        self.phases[phase.index()].timeouts += 1;
    }

    pub fn total_replies(&self) -> u64 {
        self.phases.iter().map(PhaseStats::replies).sum()
    }

    pub fn has_replies(&self) -> bool {
        self.total_replies() > 0
    }

    /// A server passes when it answered at least once and no session
    /// failed or hit a protocol error.
    pub fn passed(&self) -> bool {
        self.has_replies() && self.failed + self.errors == 0
    }

    /// Time from the first send to the last reply.
    pub fn elapsed(&self) -> Duration {
        match (self.first_sent, self.last_received) {
            (Some(first), Some(last)) => last.saturating_duration_since(first),
            _ => Duration::ZERO,
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// The end-of-run summary, one block per server.
pub struct Report<'a> {
    pub started: DateTime<Local>,
    pub exchange: Exchange,
    pub servers: Vec<(Ipv6Addr, &'a Statistics)>,
}

impl Report<'_> {
    /// 0 when every server passed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.servers.iter().all(|(_, stats)| stats.passed()) {
            0
        } else {
            1
        }
    }

    fn write_phase(
        f: &mut fmt::Formatter<'_>,
        label: &str,
        phase: &PhaseStats,
    ) -> fmt::Result {
        writeln!(f, "{:<24}{:>8}", format!("{} sent:", label), phase.sent)?;
        writeln!(f, "{:<24}{:>8}", format!("{} acks:", label), phase.acked)?;
        writeln!(f, "{:<24}{:>8}", format!("{} naks:", label), phase.nacked)?;
        writeln!(f, "{:<24}{:>8}", format!("{} timeouts:", label), phase.timeouts)?;
        writeln!(
            f,
            "{:<24}{:.3}/{:.3}/{:.3} ms (min/max/avg)",
            format!("{} latency:", label),
            millis(phase.latency_min.unwrap_or_default()),
            millis(phase.latency_max),
            millis(phase.average_latency())
        )
    }
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test started: {}", self.started.format("%Y-%m-%d %H:%M:%S"))?;

        let exchange = match self.exchange {
            Exchange::Request => "Request",
            Exchange::Renew => "Renew",
            Exchange::InformationRequest => "Info-Req",
        };

        for (address, stats) in &self.servers {
            writeln!(f, "Server {}", address)?;
            if !stats.has_replies() {
                writeln!(f, "    No replies received.")?;
                writeln!(f, "{}", "-".repeat(48))?;
                continue;
            }

            Self::write_phase(f, "Solicit", stats.phase(Phase::Solicit))?;
            Self::write_phase(f, exchange, stats.phase(Phase::Request))?;
            Self::write_phase(f, "Release", stats.phase(Phase::Release))?;
            Self::write_phase(f, "Decline", stats.phase(Phase::Decline))?;

            let elapsed = stats.elapsed();
            writeln!(f, "{:<24}{:>8}", "Completed:", stats.completed)?;
            writeln!(f, "{:<24}{:>8}", "Failed:", stats.failed)?;
            writeln!(f, "{:<24}{:>8}", "Errors:", stats.errors)?;
            writeln!(f, "{:<24}{:>11.2} s", "Elapsed:", elapsed.as_secs_f64())?;
            writeln!(
                f,
                "{:<24}{:>11.2}",
                "Advertise acks/sec:",
                per_second(stats.phase(Phase::Solicit).acked, elapsed)
            )?;
            writeln!(
                f,
                "{:<24}{:>11.2}",
                "Leases/sec:",
                per_second(stats.phase(Phase::Request).acked, elapsed)
            )?;
            writeln!(f, "{}", "-".repeat(48))?;
        }

        write!(f, "Return value: {}", self.exit_code())
    }
}

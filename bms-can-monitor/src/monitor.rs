use std::future::Future;
use std::io::Write;
use std::time::{Duration, Instant};

use bms_can_decoder::can_frame::CanFrame;
use bms_can_decoder::{decode_frame, BmsCanData, Decoded, TelemetryCache};
use chrono::{DateTime, Local};
use embedded_can::ExtendedId;
use serde::Serialize;
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::bus::{CanBus, RemoteRequest};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Raw dump line followed by a labeled block per message
    Text,
    /// One JSON object per received frame
    Json,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub request_id: ExtendedId,
    pub request_interval: Duration,
    pub receive_timeout: Duration,
    pub format: OutputFormat,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            request_id: ExtendedId::new(bms_can_decoder::REQUEST_ID)
                .unwrap_or(ExtendedId::MAX),
            request_interval: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(1),
            format: OutputFormat::Text,
        }
    }
}

/// Fires on the first poll and then at most once per interval
#[derive(Debug)]
pub struct RequestTimer {
    interval: Duration,
    last_request: Option<Instant>,
}

impl RequestTimer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_request: None,
        }
    }

    pub fn poll(&mut self, now: Instant) -> bool {
        let due = match self.last_request {
            Some(last_request) => now.saturating_duration_since(last_request) >= self.interval,
            None => true,
        };
        if due {
            self.last_request = Some(now);
        }
        due
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Frame,
    NoData,
    ReceiveFailed,
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    timestamp: String,
    id: u32,
    extended: bool,
    data: &'a [u8],
    kind: &'static str,
    message: Option<&'a BmsCanData>,
}

pub struct Monitor<B, W> {
    bus: B,
    out: W,
    cache: TelemetryCache,
    timer: RequestTimer,
    request: RemoteRequest,
    config: MonitorConfig,
}

impl<B: CanBus, W: Write> Monitor<B, W> {
    pub fn new(bus: B, out: W, config: MonitorConfig) -> Self {
        Self {
            bus,
            out,
            cache: TelemetryCache::new(),
            timer: RequestTimer::new(config.request_interval),
            request: RemoteRequest::new(config.request_id),
            config,
        }
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    /// Polls until `shutdown` resolves
    pub async fn run(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        info!("Starting loop. Press Ctrl-C to stop.");

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = self.poll_once(Instant::now()) => {}
            }
        }

        info!("Stopping...");
        self.log_cache_summary();
    }

    pub async fn poll_once(&mut self, now: Instant) -> PollEvent {
        if self.timer.poll(now) {
            self.send_request().await;
        }

        match self.bus.receive(self.config.receive_timeout).await {
            Ok(Some(frame)) => {
                self.handle_frame(&frame, Local::now());
                PollEvent::Frame
            }
            Ok(None) => {
                info!("No message");
                PollEvent::NoData
            }
            Err(e) => {
                error!("Failed to receive CAN frame: {e}");
                PollEvent::ReceiveFailed
            }
        }
    }

    async fn send_request(&mut self) {
        match self.bus.send(&self.request).await {
            Ok(()) => info!("Requested RTR 0x{:X}", self.request.id.as_raw()),
            Err(e) => error!("Failed to send RTR: {e}"),
        }
    }

    fn handle_frame(&mut self, frame: &CanFrame, timestamp: DateTime<Local>) {
        let decoded = decode_frame(frame, &mut self.cache);
        match &decoded {
            Decoded::Message(data) => trace!("{:?}", data),
            Decoded::Malformed(kind) => {
                warn!("Failed to parse {:?} data from CAN frame: {:?}", kind, frame)
            }
            Decoded::Unknown(_) => {}
        }

        let written = match self.config.format {
            OutputFormat::Text => self.write_text(frame, &decoded, timestamp),
            OutputFormat::Json => self.write_json(frame, &decoded, timestamp),
        };
        if let Err(e) = written.and_then(|()| self.out.flush()) {
            warn!("Failed to write report: {e}");
        }
    }

    fn write_text(
        &mut self,
        frame: &CanFrame,
        decoded: &Decoded,
        timestamp: DateTime<Local>,
    ) -> std::io::Result<()> {
        writeln!(
            self.out,
            "[{}] RAW: {}",
            timestamp.format("%H:%M:%S%.3f"),
            frame.raw_dump()
        )?;
        match decoded {
            Decoded::Message(data) => write!(self.out, "\n{}", data),
            Decoded::Unknown(id) => writeln!(self.out, "Unknown CAN ID: 0x{:X}", id),
            Decoded::Malformed(_) => Ok(()),
        }
    }

    fn write_json(
        &mut self,
        frame: &CanFrame,
        decoded: &Decoded,
        timestamp: DateTime<Local>,
    ) -> std::io::Result<()> {
        let (kind, message) = match decoded {
            Decoded::Message(data) => ("message", Some(data)),
            Decoded::Malformed(_) => ("malformed", None),
            Decoded::Unknown(_) => ("unknown", None),
        };
        let record = FrameRecord {
            timestamp: timestamp.to_rfc3339(),
            id: frame.raw_id(),
            extended: frame.is_extended(),
            data: &frame.data,
            kind,
            message,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        writeln!(self.out)
    }

    fn log_cache_summary(&self) {
        let cells = self
            .cache()
            .cell_voltages()
            .iter()
            .map(|volts| format!("{volts:.3}"))
            .collect::<Vec<_>>()
            .join(" ");
        info!("Last cell voltages [V]: {}", cells);
        info!(
            "Last temperature probes [°C]: {:?}",
            &self.cache().temperature_probes()[..3]
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::{assert, let_assert};
    use std::collections::VecDeque;
    use std::io;
    use tokio::sync::oneshot;

    /// Replays scripted receive results, then signals `exhausted` and blocks
    #[derive(Default)]
    struct ScriptedBus {
        frames: VecDeque<io::Result<Option<CanFrame>>>,
        sent: Vec<RemoteRequest>,
        fail_send: bool,
        exhausted: Option<oneshot::Sender<()>>,
    }

    impl ScriptedBus {
        fn with_frames(frames: impl IntoIterator<Item = io::Result<Option<CanFrame>>>) -> Self {
            Self {
                frames: frames.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl CanBus for ScriptedBus {
        async fn send(&mut self, request: &RemoteRequest) -> io::Result<()> {
            self.sent.push(*request);
            if self.fail_send {
                Err(io::Error::new(io::ErrorKind::Other, "No buffer space available"))
            } else {
                Ok(())
            }
        }

        async fn receive(&mut self, _timeout: Duration) -> io::Result<Option<CanFrame>> {
            match self.frames.pop_front() {
                Some(result) => result,
                None => {
                    if let Some(exhausted) = self.exhausted.take() {
                        let _ = exhausted.send(());
                    }
                    std::future::pending().await
                }
            }
        }
    }

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::from_encoded(ExtendedId::new(id).unwrap(), data).unwrap()
    }

    fn output(monitor: Monitor<ScriptedBus, Vec<u8>>) -> String {
        String::from_utf8(monitor.out).unwrap()
    }

    #[test]
    fn request_timer_fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = RequestTimer::new(Duration::from_secs(1));
        assert!(timer.poll(start));
        assert!(!timer.poll(start + Duration::from_millis(990)));
        assert!(timer.poll(start + Duration::from_secs(1)));
        assert!(!timer.poll(start + Duration::from_millis(1500)));
        assert!(timer.poll(start + Duration::from_millis(2500)));
    }

    #[tokio::test]
    async fn requests_on_interval_and_reports_no_data() {
        let bus = ScriptedBus::with_frames([Ok(None), Ok(None), Ok(None)]);
        let mut monitor = Monitor::new(bus, Vec::new(), MonitorConfig::default());

        let start = Instant::now();
        assert!(monitor.poll_once(start).await == PollEvent::NoData);
        assert!(monitor.poll_once(start + Duration::from_millis(990)).await == PollEvent::NoData);
        assert!(monitor.poll_once(start + Duration::from_secs(1)).await == PollEvent::NoData);

        assert!(monitor.bus.sent.len() == 2);
        assert!(monitor.bus.sent[0].id.as_raw() == 0x18FF28F4);
        assert!(monitor.bus.sent[0].dlc == 8);
        assert!(output(monitor).is_empty());
    }

    #[tokio::test]
    async fn send_failure_is_not_fatal() {
        let mut bus = ScriptedBus::with_frames([
            Ok(None),
            Ok(Some(frame(0x18B428F4, &[0x41, 0x42, 0x43]))),
        ]);
        bus.fail_send = true;
        let mut monitor = Monitor::new(bus, Vec::new(), MonitorConfig::default());

        let start = Instant::now();
        assert!(monitor.poll_once(start).await == PollEvent::NoData);
        assert!(monitor.poll_once(start + Duration::from_secs(2)).await == PollEvent::Frame);
        assert!(monitor.bus.sent.len() == 2);
        assert!(monitor.cache().temperature_probes()[..3] == [25_i16, 26, 27]);
    }

    #[tokio::test]
    async fn receive_failure_is_absorbed() {
        let bus = ScriptedBus::with_frames([
            Err(io::Error::new(io::ErrorKind::Other, "Network is down")),
            Ok(None),
        ]);
        let mut monitor = Monitor::new(bus, Vec::new(), MonitorConfig::default());
        let now = Instant::now();
        assert!(monitor.poll_once(now).await == PollEvent::ReceiveFailed);
        assert!(monitor.poll_once(now).await == PollEvent::NoData);
    }

    #[tokio::test]
    async fn prints_raw_dump_then_decoded_block() {
        let bus = ScriptedBus::with_frames([
            Ok(Some(frame(
                0x18FF28F4,
                &[0x0F, 0x32, 0x88, 0x13, 0x40, 0x9C, 0x00, 0x00],
            ))),
            Ok(Some(frame(0x18C728F4, &[0x01, 0x02]))),
            Ok(Some(frame(0x18FF28F4, &[0x0F]))),
        ]);
        let mut monitor = Monitor::new(bus, Vec::new(), MonitorConfig::default());
        let now = Instant::now();
        for _ in 0..3 {
            assert!(monitor.poll_once(now).await == PollEvent::Frame);
        }

        let text = output(monitor);
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].ends_with("] RAW: 0x18FF28F4 [8] 0F 32 88 13 40 9C 00 00"));
        assert!(lines[1].is_empty());
        assert!(lines[2] == "--- BMS BASIC INFO 1 ---");
        assert!(lines.contains(&"SOC: 50%"));
        assert!(lines.contains(&"Current: 0.0 A"));
        assert!(lines.contains(&"Voltage: 4000.0 V"));
        assert!(lines.contains(&"Fault level: NO FAULT"));
        assert!(lines.contains(&"Unknown CAN ID: 0x18C728F4"));
        assert!(lines.last().unwrap().ends_with("] RAW: 0x18FF28F4 [1] 0F"));
    }

    #[tokio::test]
    async fn json_output_carries_decoded_message() {
        let bus = ScriptedBus::with_frames([
            Ok(Some(frame(0x18CA28F4, &[0x0E, 0x74, 0x0E, 0x75]))),
            Ok(Some(frame(0x18C728F4, &[]))),
        ]);
        let config = MonitorConfig {
            format: OutputFormat::Json,
            ..Default::default()
        };
        let mut monitor = Monitor::new(bus, Vec::new(), config);
        let now = Instant::now();
        monitor.poll_once(now).await;
        monitor.poll_once(now).await;

        let text = output(monitor);
        let records: Vec<serde_json::Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert!(records.len() == 2);
        assert!(records[0]["id"] == 0x18CA28F4);
        assert!(records[0]["extended"] == true);
        assert!(records[0]["kind"] == "message");
        assert!(records[0]["message"]["type"] == "CellVoltages");
        assert!(records[0]["message"]["first_cell"] == 8);
        assert!(records[1]["kind"] == "unknown");
        assert!(records[1]["message"].is_null());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_and_keeps_cache() {
        let (exhausted, shutdown) = oneshot::channel();
        let mut bus = ScriptedBus::with_frames([
            Ok(Some(frame(0x18C828F4, &[0x0C, 0xE4, 0x0C, 0xE5]))),
            Ok(None),
        ]);
        bus.exhausted = Some(exhausted);
        let mut monitor = Monitor::new(bus, Vec::new(), MonitorConfig::default());

        monitor
            .run(async {
                let _ = shutdown.await;
            })
            .await;

        assert!(monitor.cache().cell_voltages()[..3] == [3.3_f32, 3.301, 0.0]);
        assert!(monitor.bus.sent.len() == 1);
        let_assert!(Some(first) = output(monitor).lines().next().map(str::to_owned));
        assert!(first.contains("RAW: 0x18C828F4 [4] 0C E4 0C E5"));
    }
}

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::types::{LogRecord, PodStream};

/// How long the ordered merge parks when every live stream is momentarily
/// empty. Keeps the scan responsive without spinning.
const IDLE_POLL: Duration = Duration::from_millis(10);

/// Fan every pod stream into one output channel with no cross-stream
/// ordering. Per-stream FIFO is preserved by the dedicated forwarder task.
///
/// The output channel closes once `intake` is closed (no more streams will
/// arrive) and every forwarder has finished, because at that point the last
/// clone of `out` has been dropped.
pub async fn aggregate_unordered(mut intake: mpsc::Receiver<PodStream>, out: mpsc::Sender<LogRecord>) {
    while let Some(stream) = intake.recv().await {
        let out = out.clone();
        tokio::spawn(async move {
            debug!("forwarding {}", stream.identity);
            let mut rx = stream.rx;
            while let Some(record) = rx.recv().await {
                if out.send(record).await.is_err() {
                    return;
                }
            }
            debug!("{} drained", stream.identity);
        });
    }
}

struct Slot {
    stream: PodStream,
    head: Option<LogRecord>,
    exhausted: bool,
}

impl Slot {
    fn new(stream: PodStream) -> Self {
        Self {
            stream,
            head: None,
            exhausted: false,
        }
    }

    fn done(&self) -> bool {
        self.exhausted && self.head.is_none()
    }
}

/// K-way merge of all pod streams by the lexical order of their timestamp
/// tokens (valid because the API server emits fixed-width RFC3339Nano).
///
/// Streams may keep arriving while the merge runs; arrivals append to the
/// slot array and existing indices never move. Each iteration does a single
/// non-blocking receive pass across the unfilled slots, so one slow pod can
/// delay its own lines but never stalls the scan of the others. Terminates
/// when intake is closed and every slot is drained.
pub async fn aggregate_ordered(mut intake: mpsc::Receiver<PodStream>, out: mpsc::Sender<LogRecord>) {
    let mut slots: Vec<Slot> = Vec::new();
    let mut intake_closed = false;

    loop {
        // Absorb newly discovered streams. Blocking here is only allowed
        // when there is nothing left to merge, otherwise a quiet discovery
        // phase would hold up ready records.
        loop {
            if !intake_closed && slots.iter().all(Slot::done) {
                match intake.recv().await {
                    Some(stream) => {
                        debug!("merging {}", stream.identity);
                        slots.push(Slot::new(stream));
                    }
                    None => {
                        intake_closed = true;
                        break;
                    }
                }
            } else {
                match intake.try_recv() {
                    Ok(stream) => {
                        debug!("merging {}", stream.identity);
                        slots.push(Slot::new(stream));
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        intake_closed = true;
                        break;
                    }
                }
            }
        }

        // One non-blocking pass to refill empty heads.
        for slot in slots.iter_mut() {
            if slot.head.is_none() && !slot.exhausted {
                match slot.stream.rx.try_recv() {
                    Ok(record) => slot.head = Some(record),
                    Err(TryRecvError::Empty) => {}
                    Err(TryRecvError::Disconnected) => slot.exhausted = true,
                }
            }
        }

        // Emit the smallest buffered head; ties go to the lowest slot index.
        let mut lowest: Option<usize> = None;
        for (i, slot) in slots.iter().enumerate() {
            let Some(head) = &slot.head else { continue };
            let better = match lowest.and_then(|j| slots[j].head.as_ref()) {
                Some(current) => head.time < current.time,
                None => true,
            };
            if better {
                lowest = Some(i);
            }
        }
        if let Some(i) = lowest {
            if let Some(record) = slots[i].head.take() {
                if out.send(record).await.is_err() {
                    return;
                }
                continue;
            }
        }

        if intake_closed && slots.iter().all(Slot::done) {
            break;
        }

        // Nothing buffered and nothing readable right now; park briefly.
        tokio::time::sleep(IDLE_POLL).await;
    }
    debug!("ordered merge complete");
}

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use log::{debug, warn};

use crate::classifier::{sample_clip, Classifier};
use crate::error::Error;
use crate::frame::Crop;
use crate::store::FullClip;
use crate::track::TrackId;

#[derive(Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    /// Labels eligible for logging; anything else is discarded.
    pub target_activities: BTreeSet<String>,
    /// Worker threads. `0` classifies inline on the caller's thread.
    pub workers: usize,
    /// Bounded job queue in front of the workers.
    pub queue: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(String),
    Rejected(String),
    Failed(String),
    TimedOut,
    /// The clip had no frames.
    Empty,
}

impl Verdict {
    #[inline]
    pub fn accepted(&self) -> Option<&str> {
        match self {
            Verdict::Accepted(label) => Some(label),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub track_id: TrackId,
    pub verdict: Verdict,
}

/// Samples `clip` down to the classifier's length, classifies it and checks
/// the label against `allow`.
pub fn classify_clip(
    classifier: &dyn Classifier,
    allow: &BTreeSet<String>,
    clip: &[Crop],
) -> Verdict {
    judge(classifier, allow, clip, None)
}

fn judge(
    classifier: &dyn Classifier,
    allow: &BTreeSet<String>,
    clip: &[Crop],
    deadline: Option<Instant>,
) -> Verdict {
    if clip.is_empty() {
        return Verdict::Empty;
    }

    let sampled = sample_clip(clip, classifier.clip_len());
    if sampled.is_empty() {
        return Verdict::Empty;
    }

    let result = panic::catch_unwind(AssertUnwindSafe(|| match deadline {
        Some(deadline) => classifier.classify_until(&sampled, deadline),
        None => classifier.classify(&sampled),
    }));

    match result {
        Ok(Ok(label)) if allow.contains(&label) => Verdict::Accepted(label),
        Ok(Ok(label)) => Verdict::Rejected(label),
        Ok(Err(err)) => Verdict::Failed(err.to_string()),
        Err(payload) => Verdict::Failed(panic_message(payload)),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("classifier panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("classifier panicked: {}", s)
    } else {
        "classifier panicked".to_string()
    }
}

struct Job {
    seq: u64,
    track_id: TrackId,
    frames: Vec<Crop>,
    deadline: Instant,
}

struct Done {
    seq: u64,
    outcome: Outcome,
}

// a clip handed to the pool and not yet answered
struct Pending {
    seq: u64,
    deadline: Instant,
}

#[derive(Clone)]
struct Context {
    classifier: Arc<dyn Classifier>,
    allow: Arc<BTreeSet<String>>,
}

impl Context {
    fn run(&self, job: Job) -> Outcome {
        let verdict = if Instant::now() > job.deadline {
            Verdict::TimedOut
        } else {
            let verdict = judge(
                self.classifier.as_ref(),
                &self.allow,
                &job.frames,
                Some(job.deadline),
            );

            if Instant::now() > job.deadline {
                debug!("track {}: discarding late verdict {:?}", job.track_id, verdict);
                Verdict::TimedOut
            } else {
                verdict
            }
        };

        Outcome {
            track_id: job.track_id,
            verdict,
        }
    }
}

enum Dispatch {
    Inline,
    Pool {
        jobs: Option<Sender<Job>>,
        results: Receiver<Done>,
        workers: Vec<JoinHandle<()>>,
    },
}

/// Turns full clips into classification outcomes.
///
/// With workers, at most one clip per track is in flight; a clip arriving for
/// a track that is still being classified is dropped. A clip not answered by
/// its deadline is abandoned: it yields [`Verdict::TimedOut`] and whatever the
/// worker reports later is discarded. Outcomes are handed back to the caller,
/// which stays the only writer of track state.
pub struct ClassificationTrigger {
    ctx: Context,
    timeout: Duration,
    dispatch: Dispatch,
    in_flight: HashMap<TrackId, Pending>,
    next_seq: u64,
    dropped: u64,
}

impl ClassificationTrigger {
    pub fn new(classifier: Arc<dyn Classifier>, config: TriggerConfig) -> Result<Self, Error> {
        let ctx = Context {
            classifier,
            allow: Arc::new(config.target_activities),
        };

        let dispatch = if config.workers == 0 {
            Dispatch::Inline
        } else {
            let (job_tx, job_rx) = bounded::<Job>(config.queue.max(1));
            let (res_tx, res_rx) = unbounded();
            let mut workers = Vec::with_capacity(config.workers);

            for i in 0..config.workers {
                let ctx = ctx.clone();
                let jobs = job_rx.clone();
                let results = res_tx.clone();

                let handle = std::thread::Builder::new()
                    .name(format!("classify-{}", i))
                    .spawn(move || {
                        for job in jobs.iter() {
                            let seq = job.seq;
                            let outcome = ctx.run(job);

                            if results.send(Done { seq, outcome }).is_err() {
                                break;
                            }
                        }
                    })?;

                workers.push(handle);
            }

            Dispatch::Pool {
                jobs: Some(job_tx),
                results: res_rx,
                workers,
            }
        };

        Ok(Self {
            ctx,
            timeout: config.timeout,
            dispatch,
            in_flight: HashMap::new(),
            next_seq: 0,
            dropped: 0,
        })
    }

    /// Hands a full clip over for classification.
    ///
    /// Inline mode returns the outcome right away. Pool mode returns `None`;
    /// the outcome shows up in [`poll`](Self::poll) or
    /// [`shutdown`](Self::shutdown).
    pub fn submit(&mut self, clip: FullClip) -> Option<Outcome> {
        let job = Job {
            seq: self.next_seq,
            track_id: clip.track_id,
            frames: clip.frames,
            deadline: Instant::now() + self.timeout,
        };
        self.next_seq += 1;

        match &self.dispatch {
            Dispatch::Inline => Some(self.ctx.run(job)),

            Dispatch::Pool { jobs, .. } => {
                let jobs = match jobs {
                    Some(jobs) => jobs,
                    None => {
                        self.dropped += 1;
                        return None;
                    }
                };

                if self.in_flight.contains_key(&job.track_id) {
                    debug!(
                        "track {} still classifying, dropping clip",
                        job.track_id
                    );
                    self.dropped += 1;
                    return None;
                }

                let track_id = job.track_id;
                let pending = Pending {
                    seq: job.seq,
                    deadline: job.deadline,
                };

                match jobs.try_send(job) {
                    Ok(()) => {
                        debug!("track {}: clip queued for classification", track_id);
                        self.in_flight.insert(track_id, pending);
                    }

                    Err(TrySendError::Full(_)) => {
                        warn!("classification queue full, dropping clip of track {}", track_id);
                        self.dropped += 1;
                    }

                    Err(TrySendError::Disconnected(_)) => {
                        warn!("classification workers gone, dropping clip of track {}", track_id);
                        self.dropped += 1;
                    }
                }

                None
            }
        }
    }

    /// Outcomes finished since the last call, without blocking. Clips past
    /// their deadline come back as [`Verdict::TimedOut`].
    pub fn poll(&mut self) -> Vec<Outcome> {
        let done: Vec<Done> = match &self.dispatch {
            Dispatch::Inline => return Vec::new(),
            Dispatch::Pool { results, .. } => results.try_iter().collect(),
        };

        let mut outcomes: Vec<_> = done.into_iter().filter_map(|d| self.settle(d)).collect();
        outcomes.extend(self.expire(Instant::now()));

        outcomes
    }

    /// Closes the queue and waits for outstanding clips, each at most until
    /// its deadline. Workers still busy after that are detached.
    pub fn shutdown(&mut self) -> Vec<Outcome> {
        let (results, workers) = match &mut self.dispatch {
            Dispatch::Inline => return Vec::new(),
            Dispatch::Pool {
                jobs,
                results,
                workers,
            } => {
                jobs.take();
                (results.clone(), std::mem::take(workers))
            }
        };

        let mut outcomes = Vec::new();
        while let Some(last) = self.in_flight.values().map(|p| p.deadline).max() {
            match results.recv_deadline(last) {
                Ok(done) => outcomes.extend(self.settle(done)),
                Err(_) => break,
            }
        }

        for (track_id, _) in self.in_flight.drain() {
            warn!("track {}: classification abandoned at shutdown", track_id);
            outcomes.push(Outcome {
                track_id,
                verdict: Verdict::TimedOut,
            });
        }

        for handle in workers {
            if !handle.is_finished() {
                debug!("detaching busy classification worker");
                continue;
            }

            if handle.join().is_err() {
                warn!("classification worker panicked");
            }
        }

        outcomes
    }

    // Accepts a worker report if it answers the clip the track is waiting on.
    fn settle(&mut self, done: Done) -> Option<Outcome> {
        let track_id = done.outcome.track_id;

        match self.in_flight.get(&track_id) {
            Some(pending) if pending.seq == done.seq => {
                self.in_flight.remove(&track_id);
                Some(done.outcome)
            }

            _ => {
                debug!("track {}: discarding verdict of an abandoned clip", track_id);
                None
            }
        }
    }

    fn expire(&mut self, now: Instant) -> Vec<Outcome> {
        let late: Vec<TrackId> = self
            .in_flight
            .iter()
            .filter(|(_, pending)| now >= pending.deadline)
            .map(|(&id, _)| id)
            .collect();

        late.into_iter()
            .map(|track_id| {
                self.in_flight.remove(&track_id);
                warn!("track {}: classification abandoned after deadline", track_id);

                Outcome {
                    track_id,
                    verdict: Verdict::TimedOut,
                }
            })
            .collect()
    }

    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[inline]
    pub fn is_pending(&self, id: TrackId) -> bool {
        self.in_flight.contains_key(&id)
    }

    /// Clips discarded because their track was busy or the queue was full.
    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Drop for ClassificationTrigger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::{classify_clip, ClassificationTrigger, Outcome, TriggerConfig, Verdict};
    use crate::classifier::Classifier;
    use crate::error::Error;
    use crate::frame::Crop;
    use crate::store::FullClip;
    use crossbeam_channel::{unbounded, Receiver};
    use ndarray::Array3;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    struct Fixed {
        label: Result<String, String>,
        len: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<Vec<u8>>>,
        delay: Duration,
    }

    impl Fixed {
        fn new(label: &str) -> Self {
            Self {
                label: Ok(label.to_string()),
                len: 8,
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                delay: Duration::ZERO,
            }
        }
    }

    impl Classifier for Fixed {
        fn clip_len(&self) -> usize {
            self.len
        }

        fn classify(&self, clip: &[Crop]) -> Result<String, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen
                .lock()
                .unwrap()
                .push(clip.iter().map(|c| c[[0, 0, 0]]).collect());
            std::thread::sleep(self.delay);
            self.label.clone().map_err(Error::Classifier)
        }
    }

    struct Gated {
        gate: Receiver<()>,
    }

    impl Classifier for Gated {
        fn clip_len(&self) -> usize {
            1
        }

        fn classify(&self, _clip: &[Crop]) -> Result<String, Error> {
            self.gate
                .recv()
                .map_err(|e| Error::Classifier(e.to_string()))?;
            Ok("squat".into())
        }
    }

    struct Panics;

    impl Classifier for Panics {
        fn clip_len(&self) -> usize {
            1
        }

        fn classify(&self, _clip: &[Crop]) -> Result<String, Error> {
            panic!("model weights missing");
        }
    }

    fn allow() -> BTreeSet<String> {
        ["squat", "push up"].iter().map(|s| s.to_string()).collect()
    }

    fn clip(track_id: u64, len: usize) -> FullClip {
        FullClip {
            track_id,
            frames: (0..len)
                .map(|i| Array3::from_elem((1, 1, 1), i as u8))
                .collect(),
        }
    }

    fn config(workers: usize) -> TriggerConfig {
        TriggerConfig {
            target_activities: allow(),
            workers,
            queue: 4,
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn empty_clip_has_no_result() {
        let c = Fixed::new("squat");
        assert_eq!(classify_clip(&c, &allow(), &[]), Verdict::Empty);
        assert_eq!(c.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn classifier_sees_uniformly_sampled_frames() {
        let c = Fixed::new("squat");
        let frames = clip(0, 32).frames;

        assert_eq!(
            classify_clip(&c, &allow(), &frames),
            Verdict::Accepted("squat".into())
        );
        assert_eq!(c.seen.lock().unwrap()[0], vec![0, 4, 8, 13, 17, 22, 26, 31]);
    }

    #[test]
    fn labels_outside_allow_list_are_rejected() {
        let c = Fixed::new("playing guitar");
        let v = classify_clip(&c, &allow(), &clip(0, 32).frames);
        assert_eq!(v, Verdict::Rejected("playing guitar".into()));
        assert_eq!(v.accepted(), None);
    }

    #[test]
    fn classifier_errors_become_failures() {
        let mut c = Fixed::new("squat");
        c.label = Err("model exploded".into());
        assert!(matches!(
            classify_clip(&c, &allow(), &clip(0, 32).frames),
            Verdict::Failed(_)
        ));
    }

    #[test]
    fn inline_submit_returns_outcome() {
        let mut trigger = ClassificationTrigger::new(Arc::new(Fixed::new("push up")), config(0)).unwrap();

        let outcome = trigger.submit(clip(3, 32));
        assert_eq!(
            outcome,
            Some(Outcome {
                track_id: 3,
                verdict: Verdict::Accepted("push up".into())
            })
        );
        assert!(trigger.poll().is_empty());
        assert!(trigger.shutdown().is_empty());
    }

    #[test]
    fn slow_classification_times_out() {
        let mut c = Fixed::new("squat");
        c.delay = Duration::from_millis(20);

        let mut cfg = config(0);
        cfg.timeout = Duration::from_millis(1);

        let mut trigger = ClassificationTrigger::new(Arc::new(c), cfg).unwrap();
        let outcome = trigger.submit(clip(0, 32)).unwrap();
        assert_eq!(outcome.verdict, Verdict::TimedOut);
    }

    #[test]
    fn pool_delivers_on_shutdown() {
        let mut trigger = ClassificationTrigger::new(Arc::new(Fixed::new("squat")), config(2)).unwrap();

        assert!(trigger.submit(clip(0, 32)).is_none());
        assert!(trigger.submit(clip(1, 32)).is_none());

        let mut outcomes = trigger.shutdown();
        outcomes.sort_by_key(|o| o.track_id);

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.verdict == Verdict::Accepted("squat".into())));
        assert_eq!(trigger.in_flight(), 0);
    }

    #[test]
    fn pool_keeps_one_task_per_track() {
        let (open, gate) = unbounded();
        let mut trigger = ClassificationTrigger::new(Arc::new(Gated { gate }), config(1)).unwrap();

        assert!(trigger.submit(clip(5, 4)).is_none());
        assert!(trigger.is_pending(5));

        // same track while the first clip is pending
        assert!(trigger.submit(clip(5, 4)).is_none());
        assert_eq!(trigger.dropped(), 1);

        assert!(trigger.submit(clip(6, 4)).is_none());
        assert_eq!(trigger.in_flight(), 2);

        open.send(()).unwrap();
        open.send(()).unwrap();

        let outcomes = trigger.shutdown();
        assert_eq!(outcomes.len(), 2);
        assert!(!trigger.is_pending(5));
    }

    #[test]
    fn poll_releases_track() {
        let mut trigger = ClassificationTrigger::new(Arc::new(Fixed::new("squat")), config(1)).unwrap();
        trigger.submit(clip(9, 8));

        let mut outcomes = Vec::new();
        for _ in 0..500 {
            outcomes.extend(trigger.poll());
            if !outcomes.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(outcomes.len(), 1);
        assert!(!trigger.is_pending(9));
    }

    #[test]
    fn classifier_panic_becomes_failure() {
        match classify_clip(&Panics, &allow(), &clip(0, 4).frames) {
            Verdict::Failed(msg) => assert!(msg.contains("model weights missing")),
            v => panic!("unexpected verdict {:?}", v),
        }
    }

    #[test]
    fn pool_survives_panicking_classifier() {
        let mut trigger = ClassificationTrigger::new(Arc::new(Panics), config(1)).unwrap();
        trigger.submit(clip(2, 4));

        let mut outcomes = Vec::new();
        for _ in 0..500 {
            outcomes.extend(trigger.poll());
            if !outcomes.is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].verdict, Verdict::Failed(_)));
        assert!(!trigger.is_pending(2));

        // the track takes new clips and the worker is still alive
        trigger.submit(clip(2, 4));
        assert_eq!(trigger.dropped(), 0);

        let outcomes = trigger.shutdown();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].verdict, Verdict::Failed(_)));
    }

    #[test]
    fn shutdown_abandons_hung_classification() {
        let mut c = Fixed::new("squat");
        c.delay = Duration::from_secs(3);

        let mut cfg = config(2);
        cfg.timeout = Duration::from_millis(50);

        let mut trigger = ClassificationTrigger::new(Arc::new(c), cfg).unwrap();
        assert!(trigger.submit(clip(1, 32)).is_none());
        std::thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        let outcomes = trigger.shutdown();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(
            outcomes,
            vec![Outcome {
                track_id: 1,
                verdict: Verdict::TimedOut
            }]
        );
        assert_eq!(trigger.in_flight(), 0);
    }

    #[test]
    fn poll_expires_hung_clip_and_frees_track() {
        let (open, gate) = unbounded();

        let mut cfg = config(2);
        cfg.timeout = Duration::from_millis(30);

        let mut trigger = ClassificationTrigger::new(Arc::new(Gated { gate }), cfg).unwrap();
        trigger.submit(clip(5, 4));
        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(
            trigger.poll(),
            vec![Outcome {
                track_id: 5,
                verdict: Verdict::TimedOut
            }]
        );
        assert!(!trigger.is_pending(5));

        trigger.submit(clip(5, 4));
        assert_eq!(trigger.dropped(), 0);
        assert!(trigger.is_pending(5));

        open.send(()).unwrap();
        open.send(()).unwrap();

        // the abandoned clip's late answer is not reported
        let outcomes = trigger.shutdown();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].track_id, 5);
    }
}

//! Frame broadcaster streaming a text animation to every client
//!
//! ## State machine
//! `Stopped → Running ⇄ Paused`, and `Running | Paused → Stopped`.
//!
//! The operator console owns the `FrameBroadcaster` and drives every
//! transition. The playback task only observes two signals:
//! - a pause gate (`watch` channel) checked before each frame
//! - a cancellation token checked at the gate, before sending, and during the
//!   inter-frame delay
//!
//! Frames go out through the same `FanOut` the chat router uses, so the task
//! never holds any session state of its own.

use crate::error::FrameError;
use crate::registry::FanOut;
use image::imageops::FilterType;
use image::DynamicImage;
use log::{debug, info, warn};
use shared::CLEAR_SCREEN;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Ordered, finite list of pre-rendered frames
#[derive(Debug, Clone, Default)]
pub struct FrameSequence {
    frames: Vec<Arc<str>>,
}

impl FrameSequence {
    pub fn new<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<str>> {
        self.frames.iter()
    }
}

/// Producer of the frames played on each start
pub trait FrameSource: Send + Sync {
    fn load_frames(&self) -> Result<FrameSequence, FrameError>;
}

/// Columns of a frame rendered from an image
pub const ASCII_WIDTH: u32 = 80;
/// Rows of a frame rendered from an image
pub const ASCII_HEIGHT: u32 = 30;
/// Glyphs from darkest to lightest
pub const ASCII_RAMP: &[u8] = b"@%#*+=-:. ";

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Reads the frames of a directory in file-name order
///
/// `*.txt` files are sent as they are. `*.png`, `*.jpg` and `*.jpeg` files are
/// rendered to `ASCII_WIDTH` x `ASCII_HEIGHT` characters with `ASCII_RAMP`.
/// Anything else in the directory is ignored.
#[derive(Debug, Clone)]
pub struct DirectoryFrameSource {
    dir: PathBuf,
}

impl DirectoryFrameSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameKind {
    Text,
    Image,
}

fn frame_kind(path: &Path) -> Option<FrameKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if ext == "txt" {
        Some(FrameKind::Text)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FrameKind::Image)
    } else {
        None
    }
}

impl FrameSource for DirectoryFrameSource {
    fn load_frames(&self) -> Result<FrameSequence, FrameError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Err(FrameError::NoFramesFound(self.dir.clone())),
        };

        let mut paths: Vec<(PathBuf, FrameKind)> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .filter_map(|path| frame_kind(&path).map(|kind| (path, kind)))
            .collect();
        paths.sort_by(|a, b| a.0.cmp(&b.0));

        if paths.is_empty() {
            return Err(FrameError::NoFramesFound(self.dir.clone()));
        }

        let mut frames = Vec::with_capacity(paths.len());
        for (path, kind) in paths {
            let frame = match kind {
                FrameKind::Text => read_text_frame(&path)?,
                FrameKind::Image => read_image_frame(&path)?,
            };
            frames.push(frame);
        }

        debug!("Loaded {} frame(s) from {}", frames.len(), self.dir.display());
        Ok(FrameSequence::new(frames))
    }
}

fn read_text_frame(path: &Path) -> Result<String, FrameError> {
    let text = fs::read_to_string(path).map_err(|source| FrameError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

fn read_image_frame(path: &Path) -> Result<String, FrameError> {
    let image = image::open(path).map_err(|source| FrameError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(image_to_ascii(&image, ASCII_WIDTH, ASCII_HEIGHT))
}

/// Scales an image to `width` x `height` cells and maps each cell's
/// brightness onto `ASCII_RAMP`, one text row per pixel row
pub fn image_to_ascii(image: &DynamicImage, width: u32, height: u32) -> String {
    let pixels = image.resize_exact(width, height, FilterType::Triangle).to_rgb8();
    let last = ASCII_RAMP.len() - 1;

    let rows: Vec<String> = pixels
        .rows()
        .map(|row| {
            row.map(|pixel| {
                let [r, g, b] = pixel.0;
                let gray = (r as usize + g as usize + b as usize) / 3;
                ASCII_RAMP[gray * last / 255] as char
            })
            .collect()
        })
        .collect();
    rows.join("\n")
}

/// In-memory frames, mostly for tests and embedded animations
impl FrameSource for FrameSequence {
    fn load_frames(&self) -> Result<FrameSequence, FrameError> {
        if self.is_empty() {
            return Err(FrameError::NoFramesFound(PathBuf::from("<memory>")));
        }
        Ok(self.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Running,
    Paused,
}

/// How a playback task ended, with the number of frames it sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEnd {
    Finished(usize),
    Cancelled(usize),
}

/// Result of an operator command against the broadcaster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The command does not apply to the current state; nothing changed
    Ignored(PlaybackState),
}

struct Playback {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
    handle: JoinHandle<PlaybackEnd>,
}

pub struct FrameBroadcaster {
    source: Arc<dyn FrameSource>,
    fanout: Arc<dyn FanOut>,
    frame_delay: Duration,
    playback: Option<Playback>,
}

impl FrameBroadcaster {
    pub fn new(source: Arc<dyn FrameSource>, fanout: Arc<dyn FanOut>, frame_delay: Duration) -> Self {
        Self {
            source,
            fanout,
            frame_delay,
            playback: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.playback {
            None => PlaybackState::Stopped,
            Some(playback) if playback.handle.is_finished() => PlaybackState::Stopped,
            Some(playback) if *playback.paused.borrow() => PlaybackState::Paused,
            Some(_) => PlaybackState::Running,
        }
    }

    /// Loads the frames and launches playback from the first one
    pub fn start(&mut self) -> Result<Transition, FrameError> {
        self.reap();
        let state = self.state();
        if state != PlaybackState::Stopped {
            warn!("Animation already playing");
            return Ok(Transition::Ignored(state));
        }

        let frames = self.source.load_frames()?;
        let cancel = CancellationToken::new();
        let (paused, gate) = watch::channel(false);

        info!("Animation launched ({} frames)", frames.len());
        let handle = tokio::spawn(play(
            frames,
            Arc::clone(&self.fanout),
            self.frame_delay,
            cancel.clone(),
            gate,
        ));

        self.playback = Some(Playback {
            cancel,
            paused,
            handle,
        });
        Ok(Transition::Applied)
    }

    pub fn pause(&mut self) -> Transition {
        self.reap();
        match (self.state(), &self.playback) {
            (PlaybackState::Running, Some(playback)) => {
                playback.paused.send_replace(true);
                info!("Animation paused");
                Transition::Applied
            }
            (state, _) => {
                warn!("Cannot pause animation while {:?}", state);
                Transition::Ignored(state)
            }
        }
    }

    pub fn resume(&mut self) -> Transition {
        self.reap();
        match (self.state(), &self.playback) {
            (PlaybackState::Paused, Some(playback)) => {
                playback.paused.send_replace(false);
                info!("Animation resumed");
                Transition::Applied
            }
            (state, _) => {
                warn!("Cannot resume animation while {:?}", state);
                Transition::Ignored(state)
            }
        }
    }

    /// Cancels playback and waits for the task to wind down
    pub async fn stop(&mut self) -> Transition {
        self.reap();
        let Some(playback) = self.playback.take() else {
            warn!("Animation is not playing");
            return Transition::Ignored(PlaybackState::Stopped);
        };

        playback.cancel.cancel();
        match playback.handle.await {
            Ok(end) => info!("Animation stopped ({:?})", end),
            Err(e) => warn!("Animation task failed: {}", e),
        }
        Transition::Applied
    }

    /// Forgets a playback task that already reached the last frame
    fn reap(&mut self) {
        if self
            .playback
            .as_ref()
            .is_some_and(|playback| playback.handle.is_finished())
        {
            self.playback = None;
        }
    }
}

async fn play(
    frames: FrameSequence,
    fanout: Arc<dyn FanOut>,
    frame_delay: Duration,
    cancel: CancellationToken,
    mut gate: watch::Receiver<bool>,
) -> PlaybackEnd {
    let mut sent = 0;

    for frame in frames.iter() {
        let open = tokio::select! {
            _ = cancel.cancelled() => false,
            opened = gate.wait_for(|paused| !*paused) => opened.is_ok(),
        };
        if !open || cancel.is_cancelled() {
            return PlaybackEnd::Cancelled(sent);
        }

        fanout.broadcast(&format!("{}{}", CLEAR_SCREEN, frame));
        sent += 1;

        tokio::select! {
            _ = cancel.cancelled() => return PlaybackEnd::Cancelled(sent),
            _ = tokio::time::sleep(frame_delay) => {}
        }
    }

    info!("Animation broadcast complete ({} frames)", sent);
    PlaybackEnd::Finished(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    #[derive(Default)]
    struct Recorder {
        payloads: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn frames(&self) -> Vec<String> {
            self.payloads
                .lock()
                .unwrap()
                .iter()
                .map(|p| p.trim_start_matches(CLEAR_SCREEN).to_string())
                .collect()
        }
    }

    impl FanOut for Recorder {
        fn broadcast(&self, payload: &str) {
            self.payloads.lock().unwrap().push(payload.to_string());
        }
    }

    fn numbered(count: usize) -> FrameSequence {
        FrameSequence::new((0..count).map(|i| format!("frame {}", i)))
    }

    fn broadcaster(frames: FrameSequence, delay: Duration) -> (FrameBroadcaster, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let fanout: Arc<dyn FanOut> = recorder.clone();
        (
            FrameBroadcaster::new(Arc::new(frames), fanout, delay),
            recorder,
        )
    }

    async fn wait_until_stopped(animation: &FrameBroadcaster) {
        for _ in 0..200 {
            if animation.state() == PlaybackState::Stopped {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("animation never stopped");
    }

    #[tokio::test]
    async fn test_plays_every_frame_in_order_then_stops() {
        let (mut animation, recorder) = broadcaster(numbered(5), Duration::from_millis(1));

        assert_eq!(animation.state(), PlaybackState::Stopped);
        assert_eq!(animation.start().unwrap(), Transition::Applied);
        wait_until_stopped(&animation).await;

        let expected: Vec<String> = (0..5).map(|i| format!("frame {}", i)).collect();
        assert_eq!(recorder.frames(), expected);
        assert!(recorder.payloads.lock().unwrap()[0].starts_with(CLEAR_SCREEN));
    }

    #[tokio::test]
    async fn test_start_twice_is_ignored() {
        let (mut animation, _recorder) = broadcaster(numbered(100), Duration::from_millis(20));

        animation.start().unwrap();
        assert_eq!(
            animation.start().unwrap(),
            Transition::Ignored(PlaybackState::Running)
        );
        animation.stop().await;
    }

    #[tokio::test]
    async fn test_start_then_stop_is_prompt() {
        let delay = Duration::from_millis(33);
        let (mut animation, recorder) = broadcaster(numbered(1000), delay);

        animation.start().unwrap();
        let began = Instant::now();
        assert_eq!(animation.stop().await, Transition::Applied);

        assert!(began.elapsed() <= delay + Duration::from_millis(20));
        assert_eq!(animation.state(), PlaybackState::Stopped);
        assert!(recorder.frames().len() <= 1);
    }

    #[tokio::test]
    async fn test_pause_resume_continues_from_next_frame() {
        let (mut animation, recorder) = broadcaster(numbered(40), Duration::from_millis(5));

        animation.start().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(animation.pause(), Transition::Applied);
        assert_eq!(animation.state(), PlaybackState::Paused);

        // Let any frame already past the gate land, then verify nothing moves
        tokio::time::sleep(Duration::from_millis(20)).await;
        let frozen = recorder.frames().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(recorder.frames().len(), frozen);
        assert!(frozen < 40);

        assert_eq!(animation.resume(), Transition::Applied);
        wait_until_stopped(&animation).await;

        let expected: Vec<String> = (0..40).map(|i| format!("frame {}", i)).collect();
        assert_eq!(recorder.frames(), expected);
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let (mut animation, _recorder) = broadcaster(numbered(100), Duration::from_millis(5));

        animation.start().unwrap();
        animation.pause();
        assert_eq!(animation.stop().await, Transition::Applied);
        assert_eq!(animation.state(), PlaybackState::Stopped);
    }

    #[tokio::test]
    async fn test_invalid_transitions_are_ignored() {
        let (mut animation, _recorder) = broadcaster(numbered(100), Duration::from_millis(5));

        assert_eq!(animation.pause(), Transition::Ignored(PlaybackState::Stopped));
        assert_eq!(animation.resume(), Transition::Ignored(PlaybackState::Stopped));
        assert_eq!(
            animation.stop().await,
            Transition::Ignored(PlaybackState::Stopped)
        );

        animation.start().unwrap();
        assert_eq!(animation.resume(), Transition::Ignored(PlaybackState::Running));
        animation.pause();
        assert_eq!(animation.pause(), Transition::Ignored(PlaybackState::Paused));
        animation.stop().await;
    }

    #[tokio::test]
    async fn test_restart_after_finish() {
        let (mut animation, recorder) = broadcaster(numbered(3), Duration::from_millis(1));

        animation.start().unwrap();
        wait_until_stopped(&animation).await;
        assert_eq!(animation.start().unwrap(), Transition::Applied);
        wait_until_stopped(&animation).await;

        assert_eq!(recorder.frames().len(), 6);
    }

    #[tokio::test]
    async fn test_no_frames_keeps_stopped() {
        let (mut animation, _recorder) =
            broadcaster(FrameSequence::default(), Duration::from_millis(1));

        assert!(matches!(animation.start(), Err(FrameError::NoFramesFound(_))));
        assert_eq!(animation.state(), PlaybackState::Stopped);
    }

    #[test]
    fn test_directory_source() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("chat-frames-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        fs::write(dir.join("0002.txt"), "second\n").unwrap();
        fs::write(dir.join("0001.txt"), "first\r\n").unwrap();
        fs::write(dir.join("notes.md"), "ignored").unwrap();

        let frames = DirectoryFrameSource::new(&dir).load_frames().unwrap();
        let texts: Vec<&str> = frames.iter().map(|f| f.as_ref()).collect();
        assert_eq!(texts, vec!["first", "second"]);

        let _ = fs::remove_dir_all(&dir);
    }

    /// Black left half, white right half
    fn split_image(width: u32, height: u32) -> image::GrayImage {
        image::GrayImage::from_fn(width, height, |x, _| {
            image::Luma([if x < width / 2 { 0 } else { 255 }])
        })
    }

    #[test]
    fn test_image_to_ascii_dimensions_and_ramp() {
        let image = DynamicImage::ImageLuma8(split_image(8, 4));
        let ascii = image_to_ascii(&image, ASCII_WIDTH, ASCII_HEIGHT);

        let rows: Vec<&str> = ascii.lines().collect();
        assert_eq!(rows.len(), ASCII_HEIGHT as usize);
        for row in rows {
            assert_eq!(row.chars().count(), ASCII_WIDTH as usize);
            assert!(row.starts_with("@@@@@@@@@@"));
            assert!(row.ends_with("          "));
        }
    }

    #[test]
    fn test_image_to_ascii_mid_gray() {
        let gray = image::GrayImage::from_pixel(2, 2, image::Luma([128]));
        let ascii = image_to_ascii(&DynamicImage::ImageLuma8(gray), 3, 1);
        // 128 * 9 / 255 = 4
        assert_eq!(ascii, "+++");
    }

    #[test]
    fn test_directory_source_renders_images_in_name_order() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("chat-image-frames-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        split_image(16, 6).save(dir.join("0002.png")).unwrap();
        fs::write(dir.join("0001.txt"), "title card\n").unwrap();
        image::GrayImage::from_pixel(4, 4, image::Luma([255]))
            .save(dir.join("0003.png"))
            .unwrap();

        let frames = DirectoryFrameSource::new(&dir).load_frames().unwrap();
        let frames: Vec<&str> = frames.iter().map(|f| f.as_ref()).collect();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0], "title card");
        assert_eq!(frames[1].lines().count(), ASCII_HEIGHT as usize);
        assert!(frames[1].starts_with('@'));
        assert!(frames[2].chars().all(|c| c == ' ' || c == '\n'));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_source_corrupt_image() {
        let mut dir = std::env::temp_dir();
        dir.push(format!("chat-bad-frames-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("0001.jpg"), "not a jpeg").unwrap();

        assert!(matches!(
            DirectoryFrameSource::new(&dir).load_frames(),
            Err(FrameError::Decode { .. })
        ));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_source_missing_dir() {
        let source = DirectoryFrameSource::new("/definitely/not/here");
        assert!(matches!(
            source.load_frames(),
            Err(FrameError::NoFramesFound(_))
        ));
    }
}

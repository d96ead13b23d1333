use super::{FrameSource, SourceFrame};
use crate::error::{PipelineError, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

/// Live webcam source.
///
/// The camera handle is not shareable across threads, so a dedicated
/// capture thread owns it and keeps the most recent decoded frame in a
/// shared slot. `latest_frame` reads the slot; when the camera stalls the
/// slot keeps its timestamp and the loop skips those cycles.
pub struct WebcamSource {
    latest: Arc<Mutex<Option<SharedFrame>>>,
    stop: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
    width: u32,
    height: u32,
}

#[derive(Clone)]
struct SharedFrame {
    image: image::RgbImage,
    timestamp: f64,
}

impl WebcamSource {
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        tracing::info!(
            "Initializing webcam {} at {}x{}",
            device_index,
            width,
            height
        );

        let latest: Arc<Mutex<Option<SharedFrame>>> = Arc::new(Mutex::new(None));
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();

        let slot = latest.clone();
        let stop_flag = stop.clone();
        let worker = thread::Builder::new()
            .name("webcam-capture".into())
            .spawn(move || {
                let mut camera = match open_camera(device_index) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(()));
                        camera
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let started = Instant::now();
                while !stop_flag.load(Ordering::Relaxed) {
                    match camera
                        .frame()
                        .and_then(|frame| frame.decode_image::<RgbFormat>())
                    {
                        Ok(image) => {
                            *slot.lock() = Some(SharedFrame {
                                image,
                                timestamp: started.elapsed().as_secs_f64(),
                            });
                        }
                        Err(e) => {
                            tracing::warn!("camera capture failed: {e}");
                            thread::sleep(Duration::from_millis(50));
                        }
                    }
                }
            })
            .map_err(|e| {
                PipelineError::ResourceAcquisition(format!("spawn capture thread: {e}"))
            })?;

        ready_rx
            .recv()
            .map_err(|_| PipelineError::ResourceAcquisition("capture thread died".into()))??;

        tracing::info!("Webcam initialized successfully");

        Ok(Self {
            latest,
            stop,
            worker: Some(worker),
            width,
            height,
        })
    }
}

fn open_camera(device_index: u32) -> Result<Camera> {
    let index = CameraIndex::Index(device_index);
    let requested =
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestResolution);

    let mut camera = Camera::new(index, requested)
        .map_err(|e| PipelineError::ResourceAcquisition(format!("open camera: {e}")))?;

    camera
        .open_stream()
        .map_err(|e| PipelineError::ResourceAcquisition(format!("open camera stream: {e}")))?;

    Ok(camera)
}

impl FrameSource for WebcamSource {
    fn latest_frame(&mut self) -> Result<SourceFrame> {
        let shared = self
            .latest
            .lock()
            .clone()
            .ok_or_else(|| PipelineError::ResourceAcquisition("no frame available yet".into()))?;

        Ok(SourceFrame {
            image: shared.image,
            timestamp: shared.timestamp,
        })
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for WebcamSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

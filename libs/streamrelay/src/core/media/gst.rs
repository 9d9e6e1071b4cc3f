// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! GStreamer backend and RTSP mount server.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::JoinHandle;

use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_rtsp_server as gst_rtsp_server;
use gstreamer_rtsp_server::prelude::*;
use gstreamer_video as gst_video;
use parking_lot::Mutex;

use super::{MediaBackend, PadInfo};
use crate::core::bus::{BusEvent, BusMessage, DetectionBatch, EventSender, LoopEvent};
use crate::core::config::ServerConfig;
use crate::core::coordinator::MountRegistration;
use crate::core::engine::Detection;
use crate::core::frames::{FrameLayout, PipelineBuffer, PixelFormat};
use crate::core::graph::{GraphStage, SessionId, StageKind};
use crate::core::logging::{Severity, SharedLogSink};

/// Box outline thickness drawn by the overlay stage, in pixels.
const OVERLAY_LINE: usize = 2;

/// Media served at every mount: the session's payloaded output, pushed in
/// through an appsrc standing in for the payloader.
const MOUNT_LAUNCH: &str = "( appsrc name=pay0 is-live=true format=time do-timestamp=true )";

/// Appsrcs of the mount media currently fed from one session's output.
type Feeds = Arc<Mutex<Vec<gst_app::AppSrc>>>;

/// A mapped `gst::Buffer` handed to the inference pool.
///
/// Holds a reference on the buffer, so the memory stays valid until the
/// job drops it.
struct GstFrame {
    mapped: gst::MappedBuffer<gst::buffer::Readable>,
    layout: FrameLayout,
}

impl PipelineBuffer for GstFrame {
    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn bytes(&self) -> &[u8] {
        self.mapped.as_slice()
    }
}

fn pixel_format(format: gst_video::VideoFormat) -> Option<PixelFormat> {
    match format {
        gst_video::VideoFormat::Rgb => Some(PixelFormat::Rgb8),
        gst_video::VideoFormat::Bgr => Some(PixelFormat::Bgr8),
        gst_video::VideoFormat::Rgba | gst_video::VideoFormat::Rgbx => Some(PixelFormat::Rgba8),
        gst_video::VideoFormat::Bgra | gst_video::VideoFormat::Bgrx => Some(PixelFormat::Bgra8),
        gst_video::VideoFormat::Nv12 => Some(PixelFormat::Nv12),
        gst_video::VideoFormat::I420 => Some(PixelFormat::I420),
        _ => None,
    }
}

fn frame_layout(pad: &gst::Pad) -> Option<FrameLayout> {
    let caps = pad.current_caps()?;
    let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
    Some(FrameLayout {
        width: info.width(),
        height: info.height(),
        format: pixel_format(info.format())?,
        stride: usize::try_from(*info.stride().first()?).ok()?,
    })
}

/// Outline each detection directly in the frame.
fn draw_boxes(data: &mut [u8], layout: &FrameLayout, detections: &[Detection]) {
    let (bpp, value): (usize, &[u8]) = match layout.format {
        PixelFormat::Rgb8 | PixelFormat::Bgr8 => (3, &[0, 255, 0]),
        PixelFormat::Rgba8 | PixelFormat::Bgra8 => (4, &[0, 255, 0, 255]),
        // Luma plane only.
        PixelFormat::Nv12 | PixelFormat::I420 => (1, &[235]),
        PixelFormat::RgbF32Planar => return,
    };
    let (w, h, stride) = (
        layout.width as usize,
        layout.height as usize,
        layout.stride,
    );
    let mut put = |x: usize, y: usize| {
        let at = y * stride + x * bpp;
        if let Some(px) = data.get_mut(at..at + bpp) {
            px.copy_from_slice(value);
        }
    };
    for det in detections {
        let x0 = det.bbox.x.max(0.0) as usize;
        let y0 = det.bbox.y.max(0.0) as usize;
        let x1 = ((det.bbox.x + det.bbox.width).max(0.0) as usize).min(w.saturating_sub(1));
        let y1 = ((det.bbox.y + det.bbox.height).max(0.0) as usize).min(h.saturating_sub(1));
        if x0 >= x1 || y0 >= y1 {
            continue;
        }
        for t in 0..OVERLAY_LINE {
            for x in x0..=x1 {
                put(x, (y0 + t).min(y1));
                put(x, y1.saturating_sub(t).max(y0));
            }
            for y in y0..=y1 {
                put((x0 + t).min(x1), y);
                put(x1.saturating_sub(t).max(x0), y);
            }
        }
    }
}

/// The appsrc inside a mount's media element.
fn mount_feed(media: gst::Element) -> Option<gst_app::AppSrc> {
    media
        .downcast::<gst::Bin>()
        .ok()
        .and_then(|bin| bin.by_name("pay0"))
        .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
}

struct GstSession {
    pipeline: gst::Pipeline,
    elements: BTreeMap<StageKind, gst::Element>,
    /// Latest detections, drawn by the overlay probe.
    overlay: Arc<Mutex<Vec<Detection>>>,
    feeds: Feeds,
}

/// Runs each session as a `gst::Pipeline` and serves mounts from an
/// `RTSPServer` whose GLib main loop lives on its own thread.
pub struct GstBackend {
    sessions: HashMap<SessionId, GstSession>,
    events: Option<EventSender>,
    server: gst_rtsp_server::RTSPServer,
    main_loop: glib::MainLoop,
    server_thread: Option<JoinHandle<()>>,
    log: SharedLogSink,
}

impl GstBackend {
    pub fn new(config: &ServerConfig, log: SharedLogSink) -> Result<Self, String> {
        gst::init().map_err(|e| format!("failed to initialize GStreamer: {}", e))?;

        let server = gst_rtsp_server::RTSPServer::new();
        server.set_address(&config.host);
        server.set_service(&config.port.to_string());

        let context = glib::MainContext::new();
        server
            .attach(Some(&context))
            .map_err(|e| format!("failed to attach RTSP server: {}", e))?;
        let main_loop = glib::MainLoop::new(Some(&context), false);
        let loop_clone = main_loop.clone();
        let server_thread = std::thread::Builder::new()
            .name("streamrelay-rtsp".to_string())
            .spawn(move || loop_clone.run())
            .map_err(|e| format!("failed to spawn RTSP server thread: {}", e))?;

        log.log(
            Severity::Info,
            &format!("RTSP server listening on {}:{}", config.host, config.port),
        );
        Ok(Self {
            sessions: HashMap::new(),
            events: None,
            server,
            main_loop,
            server_thread: Some(server_thread),
            log,
        })
    }

    fn session(&self, id: &SessionId) -> Result<&GstSession, String> {
        self.sessions
            .get(id)
            .ok_or_else(|| format!("no pipeline for session {}", id))
    }

    fn element(&self, id: &SessionId, kind: StageKind) -> Result<&gst::Element, String> {
        self.session(id)?
            .elements
            .get(&kind)
            .ok_or_else(|| format!("session {} has no {} stage", id, kind))
    }

    fn events(&self) -> Result<EventSender, String> {
        self.events
            .clone()
            .ok_or_else(|| "backend not attached to an event queue".to_string())
    }

    fn install_frame_tap(&self, id: &SessionId, infer: &gst::Element) -> Result<(), String> {
        let pad = infer
            .static_pad("sink")
            .ok_or_else(|| "infer stage has no sink pad".to_string())?;
        let events = self.events()?;
        let session_id = id.clone();
        pad.add_probe(gst::PadProbeType::BUFFER, move |pad, info| {
            if let Some(gst::PadProbeData::Buffer(buffer)) = &info.data {
                let frame = frame_layout(pad).and_then(|layout| {
                    buffer
                        .clone()
                        .into_mapped_buffer_readable()
                        .ok()
                        .map(|mapped| GstFrame { mapped, layout })
                });
                if let Some(frame) = frame {
                    events.send(LoopEvent::FrameReady {
                        session_id: session_id.clone(),
                        frame: Box::new(frame),
                    });
                }
            }
            gst::PadProbeReturn::Ok
        })
        .ok_or_else(|| "failed to install frame probe".to_string())?;
        Ok(())
    }

    fn install_overlay(
        &self,
        overlay: &gst::Element,
        detections: Arc<Mutex<Vec<Detection>>>,
    ) -> Result<(), String> {
        let pad = overlay
            .static_pad("sink")
            .ok_or_else(|| "overlay stage has no sink pad".to_string())?;
        pad.add_probe(gst::PadProbeType::BUFFER, move |pad, info| {
            let Some(layout) = frame_layout(pad) else {
                return gst::PadProbeReturn::Ok;
            };
            let current = detections.lock().clone();
            if current.is_empty() {
                return gst::PadProbeReturn::Ok;
            }
            if let Some(gst::PadProbeData::Buffer(ref mut buffer)) = info.data {
                let buffer = buffer.make_mut();
                if let Ok(mut map) = buffer.map_writable() {
                    draw_boxes(map.as_mut_slice(), &layout, &current);
                }
            }
            gst::PadProbeReturn::Ok
        })
        .ok_or_else(|| "failed to install overlay probe".to_string())?;
        Ok(())
    }

    /// Terminate a payloading sink in an appsink that fans its samples out
    /// to the session's mount feeds.
    fn install_output(
        pipeline: &gst::Pipeline,
        sink: &gst::Element,
        name: &str,
        feeds: Feeds,
    ) -> Result<(), String> {
        let out = gst_app::AppSink::builder().name(format!("{}_out", name)).build();
        out.set_property("sync", false);
        out.set_callbacks(
            gst_app::AppSinkCallbacks::builder()
                .new_sample(move |appsink| {
                    let sample = appsink.pull_sample().map_err(|_| gst::FlowError::Eos)?;
                    // A feed that refuses data belongs to a client that left.
                    feeds.lock().retain(|feed| feed.push_sample(&sample).is_ok());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );
        pipeline
            .add(&out)
            .map_err(|e| format!("failed to add output: {}", e))?;
        sink.link(&out)
            .map_err(|e| format!("failed to link output: {}", e))
    }
}

impl MediaBackend for GstBackend {
    fn name(&self) -> &str {
        "gstreamer"
    }

    fn attach(&mut self, events: EventSender) {
        self.events = Some(events);
    }

    fn create_stage(&mut self, session: &SessionId, stage: &GraphStage) -> Result<(), String> {
        let entry = self.sessions.entry(session.clone()).or_insert_with(|| GstSession {
            pipeline: gst::Pipeline::builder().name(session.as_str()).build(),
            elements: BTreeMap::new(),
            overlay: Arc::new(Mutex::new(Vec::new())),
            feeds: Arc::new(Mutex::new(Vec::new())),
        });

        let element = gst::ElementFactory::make(&stage.element)
            .name(stage.name.as_str())
            .build()
            .map_err(|e| format!("failed to create {}: {}", stage.element, e))?;
        for (key, value) in &stage.options {
            if key == "name" {
                continue;
            }
            if element.find_property(key).is_none() {
                return Err(format!("{} has no property '{}'", stage.element, key));
            }
            element.set_property_from_str(key, &value.to_string());
        }
        entry
            .pipeline
            .add(&element)
            .map_err(|e| format!("failed to add {}: {}", stage.name, e))?;

        if stage.kind == StageKind::Sink && element.static_pad("src").is_some() {
            Self::install_output(
                &entry.pipeline,
                &element,
                &stage.name,
                Arc::clone(&entry.feeds),
            )?;
        }

        entry.elements.insert(stage.kind, element);
        Ok(())
    }

    fn link_static(
        &mut self,
        session: &SessionId,
        upstream: &GraphStage,
        downstream: &GraphStage,
    ) -> Result<(), String> {
        let up = self.element(session, upstream.kind)?;
        let down = self.element(session, downstream.kind)?;
        up.link(down).map_err(|e| e.to_string())
    }

    fn watch(&mut self, session: &SessionId) -> Result<(), String> {
        let events = self.events()?;
        let entry = self.session(session)?;
        let bus = entry
            .pipeline
            .bus()
            .ok_or_else(|| "pipeline has no bus".to_string())?;
        let source = entry
            .elements
            .get(&StageKind::Source)
            .cloned()
            .ok_or_else(|| "graph has no source".to_string())?;
        let infer = entry.elements.get(&StageKind::Infer).cloned();
        let overlay = entry.elements.get(&StageKind::Overlay).cloned();
        let overlay_state = Arc::clone(&entry.overlay);

        let pipeline_name = session.to_string();
        let bus_events = events.clone();
        let session_id = session.clone();
        bus.set_sync_handler(move |_bus, msg| {
            let event = match msg.view() {
                gst::MessageView::Error(err) => Some(BusEvent::Error {
                    source_stage: err
                        .src()
                        .map(|s| s.name().to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    message: err.error().to_string(),
                    debug: err.debug().map(|d| d.to_string()),
                }),
                gst::MessageView::Eos(..) => Some(BusEvent::EndOfStream),
                gst::MessageView::StateChanged(sc)
                    if sc.src().map(|s| s.name() == pipeline_name.as_str()).unwrap_or(false) =>
                {
                    Some(BusEvent::StateChanged {
                        old: format!("{:?}", sc.old()),
                        new: format!("{:?}", sc.current()),
                    })
                }
                gst::MessageView::Application(..) | gst::MessageView::Element(..) => {
                    msg.structure().map(|s| BusEvent::Custom {
                        name: s.name().to_string(),
                        payload: serde_json::Value::Null,
                    })
                }
                _ => None,
            };
            if let Some(event) = event {
                bus_events.send(LoopEvent::Bus(BusMessage {
                    session_id: session_id.clone(),
                    event,
                }));
            }
            gst::BusSyncReply::Drop
        });

        let pad_events = events;
        let session_id = session.clone();
        source.connect_pad_added(move |_src, pad| {
            let caps = pad
                .current_caps()
                .unwrap_or_else(|| pad.query_caps(None))
                .to_string();
            pad_events.send(LoopEvent::PadAdded {
                session_id: session_id.clone(),
                pad: PadInfo::new(pad.name().to_string(), caps),
            });
        });

        if let Some(infer) = infer {
            self.install_frame_tap(session, &infer)?;
        }
        if let Some(overlay) = overlay {
            self.install_overlay(&overlay, overlay_state)?;
        }
        Ok(())
    }

    fn start(&mut self, session: &SessionId) -> Result<(), String> {
        self.session(session)?
            .pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn is_linked(&self, session: &SessionId, downstream: &GraphStage) -> bool {
        self.element(session, downstream.kind)
            .ok()
            .and_then(|e| e.static_pad("sink"))
            .map(|p| p.is_linked())
            .unwrap_or(false)
    }

    fn link_dynamic(
        &mut self,
        session: &SessionId,
        pad: &PadInfo,
        downstream: &GraphStage,
    ) -> Result<(), String> {
        let source = self.element(session, StageKind::Source)?;
        let src_pad = source
            .static_pad(&pad.name)
            .ok_or_else(|| format!("source has no pad {}", pad.name))?;
        let sink_pad = self
            .element(session, downstream.kind)?
            .static_pad("sink")
            .ok_or_else(|| format!("{} has no sink pad", downstream.name))?;
        src_pad
            .link(&sink_pad)
            .map(|_| ())
            .map_err(|e| format!("{:?}", e))
    }

    fn resync(&mut self, session: &SessionId) -> Result<(), String> {
        let pipeline = &self.session(session)?.pipeline;
        pipeline
            .set_state(gst::State::Ready)
            .map_err(|e| e.to_string())?;
        pipeline
            .set_state(gst::State::Playing)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn teardown(&mut self, session: &SessionId) {
        if let Some(entry) = self.sessions.remove(session) {
            if let Some(bus) = entry.pipeline.bus() {
                bus.unset_sync_handler();
            }
            for feed in entry.feeds.lock().drain(..) {
                let _ = feed.end_of_stream();
            }
            if let Err(e) = entry.pipeline.set_state(gst::State::Null) {
                self.log.log(
                    Severity::Warning,
                    &format!("[{}] failed to stop pipeline: {}", session, e),
                );
            }
        }
    }

    fn publish(&mut self, mount: &MountRegistration) -> Result<(), String> {
        let feeds = Arc::clone(&self.session(&mount.session_id)?.feeds);
        let mounts = self
            .server
            .mount_points()
            .ok_or_else(|| "RTSP server has no mount points".to_string())?;

        let factory = gst_rtsp_server::RTSPMediaFactory::new();
        factory.set_launch(MOUNT_LAUNCH);
        factory.set_shared(true);
        let log = Arc::clone(&self.log);
        let path = mount.path.clone();
        factory.connect_media_configure(move |_factory, media| {
            match mount_feed(media.element()) {
                Some(feed) => feeds.lock().push(feed),
                None => log.log(
                    Severity::Warning,
                    &format!("mount {} has no feed; clients get no data", path),
                ),
            }
        });
        mounts.add_factory(&mount.path, factory);
        self.log.log(
            Severity::Verbose,
            &format!("[{}] serving {}", mount.session_id, mount.path),
        );
        Ok(())
    }

    fn unpublish(&mut self, path: &str) {
        if let Some(mounts) = self.server.mount_points() {
            mounts.remove_factory(path);
        }
    }

    fn deliver(&mut self, session: &SessionId, batch: &DetectionBatch) {
        if let Some(entry) = self.sessions.get(session) {
            *entry.overlay.lock() = batch.detections.clone();
        }
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        let ids: Vec<SessionId> = self.sessions.keys().cloned().collect();
        for id in ids {
            self.teardown(&id);
        }
        self.main_loop.quit();
        if let Some(thread) = self.server_thread.take() {
            let _ = thread.join();
        }
    }
}

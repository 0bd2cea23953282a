//! Request handling for one backend process.
//!
//! A [`Session`] owns the active clip set and the compositor. The set is a
//! single slot: `UpdateClips` replaces it wholesale and `RenderOne` reads it.
//! Requests are handled one at a time, so the slot needs no lock.

use std::sync::Arc;

use serde_json::Value;

use framecut_core::{Clip, FrameCutResult, PluginRegistry, ServiceSettings};
use framecut_render::{create_accelerator, Compositor, InternalPlugin};

use crate::protocol::{self, DraftStructure, Message};

/// What the connection loop should do after a request.
#[derive(Debug, Clone, PartialEq)]
pub struct Handled {
    /// Line to send back, if any.
    pub response: Option<Message>,
    /// Stop serving and shut the process down.
    pub shutdown: bool,
}

impl Handled {
    fn reply(response: Message) -> Self {
        Self {
            response: Some(response),
            shutdown: false,
        }
    }

    fn ignored() -> Self {
        Self {
            response: None,
            shutdown: false,
        }
    }
}

pub struct Session {
    compositor: Compositor,
    clips: Vec<Box<dyn Clip>>,
}

impl Session {
    pub fn new(compositor: Compositor) -> Self {
        Self {
            compositor,
            clips: Vec::new(),
        }
    }

    /// Pick the accelerator, load the built-in plugin and set up the
    /// compositor for `settings`.
    ///
    /// Fails with [`framecut_core::FrameCutError::Device`] when the requested
    /// accelerator is not available.
    pub fn from_settings(settings: &ServiceSettings) -> FrameCutResult<Self> {
        let accelerator = create_accelerator(&settings.accelerator)?;
        tracing::info!(
            "Using {} accelerator ({:?})",
            accelerator.name(),
            accelerator.execution_mode()
        );

        let mut registry = PluginRegistry::new();
        registry.init(vec![Box::new(InternalPlugin::new(accelerator))])?;

        std::fs::create_dir_all(&settings.temp_folder)?;
        Ok(Self::new(Compositor::new(
            Arc::new(registry),
            settings.output,
            settings.background,
            settings.temp_folder.clone(),
        )))
    }

    pub fn clips(&self) -> &[Box<dyn Clip>] {
        &self.clips
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    /// Handle one decoded request.
    ///
    /// Failures never escape: they are logged and turned into an error
    /// payload for the caller.
    pub fn handle(&mut self, msg: &Message) -> Handled {
        match msg.kind.as_str() {
            "" => Handled::ignored(),
            protocol::PING => Handled::reply(msg.reply(protocol::ping_payload())),
            protocol::RENDER_ONE => Handled::reply(self.render_one(msg)),
            protocol::UPDATE_CLIPS => Handled::reply(self.update_clips(msg)),
            protocol::SHUT_DOWN => {
                tracing::info!("Shutdown requested by client");
                Handled {
                    response: Some(msg.reply(protocol::ok_payload())),
                    shutdown: true,
                }
            }
            other => {
                tracing::warn!("Unknown message type: {}", other);
                Handled::ignored()
            }
        }
    }

    fn render_one(&mut self, msg: &Message) -> Message {
        let Some(payload) = msg.payload() else {
            tracing::error!("RenderOne missing payload");
            return msg.reply(protocol::error_payload("RenderOne missing payload"));
        };
        let Some(frame) = protocol::frame_index(&payload) else {
            tracing::error!("RenderOne payload is not a frame index: {}", payload);
            return msg.reply(protocol::error_payload(format!(
                "invalid frame index: {payload}"
            )));
        };

        tracing::info!("RenderOne request: frame #{}", frame);
        match self.compositor.render_to_file(&self.clips, frame) {
            Ok(path) => {
                tracing::info!("RenderOne completed: {}", path.display());
                msg.reply(protocol::completed_payload(&path.to_string_lossy()))
            }
            Err(err) => {
                tracing::error!("RenderOne frame #{} failed: {}", frame, err);
                msg.reply(protocol::error_payload(err.to_string()))
            }
        }
    }

    fn update_clips(&mut self, msg: &Message) -> Message {
        let Some(payload) = msg.payload() else {
            tracing::error!("UpdateClips missing payload");
            return msg.reply(protocol::error_payload("UpdateClips missing payload"));
        };
        match self.replace_clips(payload) {
            Ok(count) => {
                tracing::info!("Updated clips, total {} clips", count);
                msg.reply(protocol::ok_payload())
            }
            Err(err) => {
                tracing::error!("UpdateClips failed, keeping the previous clips: {}", err);
                msg.reply(protocol::error_payload(err.to_string()))
            }
        }
    }

    /// Build and initialize every clip of the draft, then swap the set.
    /// The previous set stays active when any clip fails.
    fn replace_clips(&mut self, payload: Value) -> FrameCutResult<usize> {
        let draft: DraftStructure = serde_json::from_value(payload)?;
        let registry = Arc::clone(self.compositor.registry());
        let next = build_clips(&draft.clips, &registry)?;

        let count = next.len();
        for mut old in std::mem::replace(&mut self.clips, next) {
            old.dispose();
        }
        self.compositor.begin_clip_set();
        Ok(count)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        for clip in &mut self.clips {
            clip.dispose();
        }
    }
}

fn build_clips(records: &[Value], registry: &PluginRegistry) -> FrameCutResult<Vec<Box<dyn Clip>>> {
    let mut built: Vec<Box<dyn Clip>> = Vec::with_capacity(records.len());
    for record in records {
        let result = registry.create_clip(record).and_then(|mut clip| {
            clip.reinit(registry)?;
            Ok(clip)
        });
        match result {
            Ok(clip) => {
                let header = clip.header();
                tracing::info!(
                    "Found clip {:?}, name: {}, id: {}",
                    header.clip_type,
                    header.name,
                    header.id
                );
                built.push(clip);
            }
            Err(err) => {
                for clip in &mut built {
                    clip.dispose();
                }
                let id = record.get("Id").and_then(Value::as_str).unwrap_or("<no id>");
                tracing::error!("Clip {} could not be built: {}", id, err);
                return Err(err);
            }
        }
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use framecut_core::config::OutputSize;
    use framecut_core::plugin::INTERNAL_PLUGIN_ID;
    use framecut_core::Color;
    use framecut_render::CpuAccelerator;
    use serde_json::json;

    fn session() -> Session {
        let mut registry = PluginRegistry::new();
        registry
            .init(vec![Box::new(InternalPlugin::new(Arc::new(CpuAccelerator::default())))])
            .unwrap();
        Session::new(Compositor::new(
            Arc::new(registry),
            OutputSize { width: 4, height: 4 },
            Color::BLACK,
            std::env::temp_dir().join(format!("framecut_session_{}", uuid::Uuid::new_v4())),
        ))
    }

    fn request(kind: &str, payload: Value) -> Message {
        Message {
            kind: kind.to_string(),
            request_id: json!("req"),
            payload,
        }
    }

    fn solid(id: &str, layer: u32) -> Value {
        json!({
            "Id": id,
            "FromPlugin": INTERNAL_PLUGIN_ID,
            "ClipType": 2,
            "LayerIndex": layer,
            "StartFrame": 0,
            "Duration": 10,
            "R": 65535
        })
    }

    #[test]
    fn test_ping_replies_with_time() {
        let handled = session().handle(&request("ping", Value::Null));
        let response = handled.response.unwrap();
        assert_eq!(response.kind, "ping");
        assert_eq!(response.request_id, json!("req"));
        assert!(response.payload["value"].is_string());
        assert!(!handled.shutdown);
    }

    #[test]
    fn test_unknown_and_empty_types_are_ignored() {
        let mut session = session();
        assert_eq!(session.handle(&request("Teleport", Value::Null)), Handled::ignored());
        assert_eq!(session.handle(&request("", Value::Null)), Handled::ignored());
    }

    #[test]
    fn test_missing_payload_is_an_error_reply() {
        let mut session = session();
        for kind in ["RenderOne", "UpdateClips"] {
            let response = session.handle(&request(kind, Value::Null)).response.unwrap();
            assert_eq!(response.payload["status"], "error");
        }
    }

    #[test]
    fn test_update_clips_is_atomic() {
        let mut session = session();
        let ok = session.handle(&request("UpdateClips", json!({ "Clips": [solid("a", 0)] })));
        assert_eq!(ok.response.unwrap().payload["status"], "ok");
        assert_eq!(session.clips().len(), 1);

        let bad = json!({
            "Clips": [solid("b", 0), { "Id": "c", "FromPlugin": "com.example.missing", "ClipType": 2 }]
        });
        let failed = session.handle(&request("UpdateClips", bad));
        assert_eq!(failed.response.unwrap().payload["status"], "error");
        assert_eq!(session.clips().len(), 1);
        assert_eq!(session.clips()[0].header().id, "a");
    }

    #[test]
    fn test_render_one_reports_layer_conflict() {
        let mut session = session();
        session.handle(&request("UpdateClips", json!({ "Clips": [solid("a", 1), solid("b", 1)] })));
        let response = session.handle(&request("RenderOne", json!(3))).response.unwrap();
        assert_eq!(response.payload["status"], "error");
        assert!(response.payload["message"]
            .as_str()
            .is_some_and(|m| m.contains("layer 1")));
    }

    #[test]
    fn test_shutdown_is_acknowledged() {
        let handled = session().handle(&request("ShutDown", Value::Null));
        assert!(handled.shutdown);
        assert_eq!(handled.response.unwrap().payload["status"], "ok");
    }
}

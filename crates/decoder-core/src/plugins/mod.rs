//! Decoder plugins and their lookup.

mod pcm;
mod symphonia_decoder;

use std::sync::Arc;

use anyhow::Result;

use crate::client::DecoderClient;
use crate::input::InputStreamPtr;

pub use self::pcm::PcmDecoderPlugin;
pub use self::symphonia_decoder::SymphoniaDecoderPlugin;

/// A decoder for one or more container/codec types.
///
/// `stream_decode` runs on the decode worker. It calls
/// [`DecoderClient::ready`] once the format is known and then submits audio
/// until the stream ends or the client returns STOP. Returning without
/// calling `ready` means "not my format"; the next candidate is tried.
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// File name suffixes, lower case, without the dot.
    fn suffixes(&self) -> &[&'static str];

    fn mime_types(&self) -> &[&'static str] {
        &[]
    }

    fn stream_decode(&self, client: &mut dyn DecoderClient, input: InputStreamPtr) -> Result<()>;
}

/// Ordered set of plugins.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn DecoderPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Symphonia for compressed and container formats, then raw PCM.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SymphoniaDecoderPlugin));
        registry.register(Arc::new(PcmDecoderPlugin::default()));
        registry
    }

    pub fn register(&mut self, plugin: Arc<dyn DecoderPlugin>) {
        tracing::debug!(plugin = plugin.name(), "decoder plugin registered");
        self.plugins.push(plugin);
    }

    pub fn plugins(&self) -> &[Arc<dyn DecoderPlugin>] {
        &self.plugins
    }

    /// Plugins worth trying for `uri`, best match first: plugins claiming
    /// the MIME type, then those claiming the suffix.
    pub fn candidates(&self, uri: &str, mime_type: Option<&str>) -> Vec<Arc<dyn DecoderPlugin>> {
        let mut out: Vec<Arc<dyn DecoderPlugin>> = Vec::new();

        if let Some(mime) = mime_type {
            let mime = mime.split(';').next().unwrap_or(mime).trim();
            out.extend(
                self.plugins
                    .iter()
                    .filter(|p| p.mime_types().iter().any(|m| m.eq_ignore_ascii_case(mime)))
                    .cloned(),
            );
        }

        if let Some(suffix) = uri_suffix(uri) {
            for plugin in &self.plugins {
                let claims = plugin
                    .suffixes()
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(suffix));
                if claims && !out.iter().any(|p| Arc::ptr_eq(p, plugin)) {
                    out.push(plugin.clone());
                }
            }
        }

        out
    }
}

/// File name suffix of `uri`, ignoring query strings and fragments.
pub fn uri_suffix(uri: &str) -> Option<&str> {
    let path = uri.split(['?', '#']).next().unwrap_or(uri);
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, suffix) = name.rsplit_once('.')?;
    if stem.is_empty() || suffix.is_empty() {
        return None;
    }
    Some(suffix)
}

//! Render tree for one execution's output and the host renderer boundary.
//!
//! Stream text is collected into runs: consecutive events on the same stream
//! extend the last run instead of adding a node, and a carriage return wipes
//! the run back to its last newline so progress bars show only their final
//! state. Rich outputs pick a single representation from the MIME bundle.

use kernel_events::mime::{IMAGE_JPEG, IMAGE_PNG, IMAGE_SVG, TEXT_HTML, TEXT_PLAIN};
use kernel_events::{decode_payload, strip_ansi, MimeBundle, StreamName};
use log::warn;
use serde::Serialize;

use crate::marker::MarkerId;

/// Text appended to stderr when a pending execution is cancelled.
pub const CANCELLED_NOTICE: &str = "[cancelled]";

/// One rendered output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputNode {
    Stream { name: StreamName, text: String },
    Html { html: String },
    Svg { svg: String },
    /// A decoded raster image; the original base64 payload is kept for hosts.
    Image {
        mime: String,
        data: String,
        #[serde(skip)]
        bytes: Vec<u8>,
    },
    Script { source: String },
    Plain { text: String },
}

impl OutputNode {
    /// Text shown for this node in a plain-text surface.
    pub fn display_text(&self) -> String {
        match self {
            OutputNode::Stream { text, .. } | OutputNode::Plain { text } => text.clone(),
            OutputNode::Html { html } => html.clone(),
            OutputNode::Svg { svg } => svg.clone(),
            OutputNode::Image { mime, bytes, .. } => format!("<{} {} bytes>", mime, bytes.len()),
            OutputNode::Script { .. } => String::new(),
        }
    }
}

/// Host side of rendering. The receiver's own [`RenderTree`] stays the source
/// of truth; the host mirrors it by node index.
pub trait OutputRenderer: Send + Sync {
    /// A node was added at `index`.
    fn append(&self, marker: MarkerId, index: usize, node: &OutputNode);

    /// The node at `index` changed in place (a stream run grew).
    fn replace(&self, marker: MarkerId, index: usize, node: &OutputNode);

    /// A script output should run for its side effect.
    fn run_script(&self, marker: MarkerId, source: &str);

    /// Toggle the "pending" decoration on the marker.
    fn set_pending(&self, _marker: MarkerId, _pending: bool) {}

    /// Drop everything rendered for the marker.
    fn clear(&self, _marker: MarkerId) {}
}

/// Renderer for headless use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRenderer;

impl OutputRenderer for NullRenderer {
    fn append(&self, _marker: MarkerId, _index: usize, _node: &OutputNode) {}
    fn replace(&self, _marker: MarkerId, _index: usize, _node: &OutputNode) {}
    fn run_script(&self, _marker: MarkerId, _source: &str) {}
}

/// What a mutation did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeChange {
    Appended(usize),
    Replaced(usize),
}

impl TreeChange {
    pub fn index(self) -> usize {
        match self {
            TreeChange::Appended(index) | TreeChange::Replaced(index) => index,
        }
    }
}

/// Ordered output nodes for one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderTree {
    nodes: Vec<OutputNode>,
}

impl RenderTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[OutputNode] {
        &self.nodes
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// All node text concatenated, for plain-text surfaces and tests.
    pub fn text(&self) -> String {
        self.nodes.iter().map(OutputNode::display_text).collect()
    }

    /// Append stream text, extending the run when the last node is the same
    /// stream.
    pub fn push_stream(&mut self, name: StreamName, text: &str) -> TreeChange {
        if let Some(OutputNode::Stream {
            name: last_name,
            text: run,
        }) = self.nodes.last_mut()
        {
            if *last_name == name {
                append_to_run(run, text);
                return TreeChange::Replaced(self.nodes.len() - 1);
            }
        }
        let mut run = String::new();
        append_to_run(&mut run, text);
        self.push(OutputNode::Stream { name, text: run })
    }

    pub fn push(&mut self, node: OutputNode) -> TreeChange {
        self.nodes.push(node);
        TreeChange::Appended(self.nodes.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&OutputNode> {
        self.nodes.get(index)
    }
}

/// Append `text` to a stream run. A bare `\r` truncates the run back to just
/// after its last newline; `\r\n` is an ordinary newline.
fn append_to_run(run: &mut String, text: &str) {
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                continue;
            }
            let keep = run.rfind('\n').map(|i| i + 1).unwrap_or(0);
            run.truncate(keep);
        } else {
            run.push(c);
        }
    }
}

/// Pick one node for a rich output: HTML (when enabled), SVG, PNG, JPEG,
/// script, then plain text. An undecodable image is skipped in favour of the
/// next candidate.
pub fn render_bundle(bundle: &MimeBundle, render_html: bool) -> OutputNode {
    if render_html {
        if let Some(html) = bundle.get(TEXT_HTML) {
            return OutputNode::Html {
                html: html.to_string(),
            };
        }
    }
    if let Some(svg) = bundle.get(IMAGE_SVG) {
        return OutputNode::Svg {
            svg: svg.to_string(),
        };
    }
    for mime in [IMAGE_PNG, IMAGE_JPEG] {
        if let Some(payload) = bundle.get(mime) {
            match decode_payload(payload) {
                Ok(bytes) => {
                    return OutputNode::Image {
                        mime: mime.to_string(),
                        data: payload.to_string(),
                        bytes,
                    }
                }
                Err(e) => warn!("[render] Undecodable {} payload: {}", mime, e),
            }
        }
    }
    if let Some(source) = bundle.script() {
        return OutputNode::Script {
            source: source.to_string(),
        };
    }
    plain_fallback(bundle)
}

fn plain_fallback(bundle: &MimeBundle) -> OutputNode {
    if let Some(text) = bundle.get(TEXT_PLAIN) {
        return OutputNode::Plain {
            text: text.to_string(),
        };
    }
    let mimes: Vec<&str> = bundle.iter().map(|(mime, _)| mime).collect();
    OutputNode::Plain {
        text: format!("[unsupported output: {}]", mimes.join(", ")),
    }
}

/// Traceback text for the stderr run: ANSI stripped, one line per entry.
pub fn traceback_text(ename: &str, evalue: &str, traceback: &[String]) -> String {
    if traceback.is_empty() {
        return format!("{}: {}\n", ename, evalue);
    }
    let mut out = String::new();
    for line in traceback {
        out.push_str(&strip_ansi(line));
        if !out.ends_with('\n') {
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_runs_extend() {
        let mut tree = RenderTree::new();
        assert_eq!(tree.push_stream(StreamName::Stdout, "a\n"), TreeChange::Appended(0));
        assert_eq!(tree.push_stream(StreamName::Stdout, "b\n"), TreeChange::Replaced(0));
        assert_eq!(tree.push_stream(StreamName::Stderr, "e\n"), TreeChange::Appended(1));
        assert_eq!(tree.push_stream(StreamName::Stdout, "c\n"), TreeChange::Appended(2));
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.text(), "a\nb\ne\nc\n");
    }

    #[test]
    fn test_carriage_return_truncates_run() {
        let mut tree = RenderTree::new();
        tree.push_stream(StreamName::Stdout, "done\n10%");
        tree.push_stream(StreamName::Stdout, "\r50%");
        tree.push_stream(StreamName::Stdout, "\r100%\n");
        assert_eq!(tree.text(), "done\n100%\n");
    }

    #[test]
    fn test_crlf_is_a_newline() {
        let mut tree = RenderTree::new();
        tree.push_stream(StreamName::Stdout, "a\r\nb\r\n");
        assert_eq!(tree.text(), "a\nb\n");
    }

    #[test]
    fn test_bundle_priority() {
        let bundle = MimeBundle::new()
            .with(TEXT_HTML, "<b>x</b>")
            .with(IMAGE_SVG, "<svg/>")
            .with(TEXT_PLAIN, "x");
        assert!(matches!(render_bundle(&bundle, true), OutputNode::Html { .. }));
        assert!(matches!(render_bundle(&bundle, false), OutputNode::Svg { .. }));

        let png = MimeBundle::new()
            .with(IMAGE_PNG, "aGVsbG8=")
            .with(IMAGE_JPEG, "d29ybGQ=");
        match render_bundle(&png, true) {
            OutputNode::Image { mime, bytes, .. } => {
                assert_eq!(mime, IMAGE_PNG);
                assert_eq!(bytes, b"hello");
            }
            other => panic!("unexpected node {:?}", other),
        }

        let script = MimeBundle::new()
            .with("application/javascript", "alert(1)")
            .with(TEXT_PLAIN, "<IPython.core.display.Javascript object>");
        assert_eq!(
            render_bundle(&script, true),
            OutputNode::Script {
                source: "alert(1)".into()
            }
        );
    }

    #[test]
    fn test_bad_image_degrades_to_plain_text() {
        let bundle = MimeBundle::new()
            .with(IMAGE_PNG, "%%%")
            .with(TEXT_PLAIN, "<Figure size 640x480>");
        assert_eq!(
            render_bundle(&bundle, true),
            OutputNode::Plain {
                text: "<Figure size 640x480>".into()
            }
        );
    }

    #[test]
    fn test_bad_png_falls_through_to_jpeg_and_script() {
        let bundle = MimeBundle::new()
            .with(IMAGE_PNG, "%%%")
            .with(IMAGE_JPEG, "d29ybGQ=")
            .with(TEXT_PLAIN, "<Figure>");
        match render_bundle(&bundle, true) {
            OutputNode::Image { mime, bytes, .. } => {
                assert_eq!(mime, IMAGE_JPEG);
                assert_eq!(bytes, b"world");
            }
            other => panic!("unexpected node {:?}", other),
        }

        let bundle = MimeBundle::new()
            .with(IMAGE_PNG, "%%%")
            .with("application/javascript", "draw()");
        assert_eq!(
            render_bundle(&bundle, true),
            OutputNode::Script {
                source: "draw()".into()
            }
        );
    }

    #[test]
    fn test_unsupported_bundle() {
        let bundle = MimeBundle::new().with("application/vnd.custom+json", "{}");
        assert_eq!(
            render_bundle(&bundle, true),
            OutputNode::Plain {
                text: "[unsupported output: application/vnd.custom+json]".into()
            }
        );
    }

    #[test]
    fn test_traceback_text() {
        let text = traceback_text(
            "NameError",
            "name 'y' is not defined",
            &["\x1b[0;31mNameError\x1b[0m: name 'y' is not defined".to_string()],
        );
        assert_eq!(text, "NameError: name 'y' is not defined\n");
        assert_eq!(traceback_text("E", "v", &[]), "E: v\n");
    }
}

//! Gated batch operations.

use regex::{Captures, Regex};
use std::borrow::Cow;
use std::collections::HashMap;
use std::future::Future;
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;

use scriptorium_types::{encode_path, AbsPath, DiskEvent, IndexChange, WritePayload};

use super::Disk;
use crate::error::{DiskError, DiskResult};
use crate::storage::WriteOptions;
use crate::tree::{NodeInfo, SharedIter};

/// Characters that continue a path; a reference must not touch one on
/// either side.
const PATH_CHARS: &str = r"A-Za-z0-9_.~%/\-";

fn continues_path(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '~' | '%' | '/' | '-')
}

/// Rewrites whole-path references in text.
///
/// For every `(old, new)` pair three spellings are replaced: the
/// origin-qualified URL (when an origin is given), the percent-encoded
/// path and the plain path. All pairs are applied in one pass over the
/// original text, so a replacement is never matched again; swaps and
/// chains land where the pairs say. When two pairs share a spelling the
/// first one wins.
#[derive(Debug)]
pub struct ReferenceReplacer {
    regex: Regex,
    targets: HashMap<String, String>,
}

impl ReferenceReplacer {
    pub fn new(pairs: &[(AbsPath, AbsPath)], origin: Option<&str>) -> Result<Self, regex::Error> {
        let origin = origin.map(|o| o.trim_end_matches('/'));
        let mut targets = HashMap::new();
        for (old, new) in pairs {
            if let Some(origin) = origin {
                targets
                    .entry(format!("{origin}{old}"))
                    .or_insert_with(|| format!("{origin}{new}"));
            }
            let encoded = encode_path(old.as_str());
            if encoded != old.as_str() {
                targets.entry(encoded).or_insert_with(|| encode_path(new.as_str()));
            }
            targets.entry(old.to_string()).or_insert_with(|| new.to_string());
        }

        // Longest first so a qualified spelling beats the bare path inside it
        let mut spellings: Vec<&str> = targets.keys().map(String::as_str).collect();
        spellings.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = spellings
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");
        let regex = Regex::new(&format!(r"(^|[^{PATH_CHARS}])({alternation})"))?;
        Ok(Self { regex, targets })
    }

    /// The rewritten text, or `None` when nothing matched.
    pub fn apply(&self, text: &str) -> Option<String> {
        let mut changed = false;
        let replaced = self.regex.replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let end = caps.get(0).map_or(0, |m| m.end());
            if text[end..].chars().next().is_some_and(continues_path) {
                return whole.to_string();
            }
            match self.targets.get(&caps[2]) {
                Some(to) => {
                    changed |= to.as_str() != &caps[2];
                    format!("{}{to}", &caps[1])
                }
                None => whole.to_string(),
            }
        });
        match replaced {
            Cow::Owned(out) if changed => Some(out),
            _ => None,
        }
    }
}

impl Disk {
    /// Visit every file under the gate, checking `cancel` between files.
    ///
    /// Returns the number of files visited.
    pub async fn walk_files_async<F, Fut>(&self, cancel: &CancellationToken, mut visit: F) -> DiskResult<usize>
    where
        F: FnMut(NodeInfo) -> Fut,
        Fut: Future<Output = ControlFlow<()>>,
    {
        self.ready().await?;
        let _gate = self.inner.gate.acquire("walk_files").await;

        let mut visited = 0;
        for info in SharedIter::new(self.file_tree()).with_filter(|n| n.is_file()) {
            if cancel.is_cancelled() {
                return Err(DiskError::Cancelled);
            }
            visited += 1;
            if visit(info).await.is_break() {
                break;
            }
        }
        Ok(visited)
    }

    /// Rewrite references to moved images in every markdown-like file.
    ///
    /// Only files whose text changes are written. One aggregate write event
    /// goes out for the rewritten files, even when the batch is cancelled
    /// or fails part way; writes already made are not rolled back.
    pub async fn find_replace_img_batch(
        &self,
        pairs: &[(AbsPath, AbsPath)],
        origin: Option<&str>,
        cancel: &CancellationToken,
    ) -> DiskResult<Vec<AbsPath>> {
        self.ready().await?;
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let replacer = ReferenceReplacer::new(pairs, origin)
            .map_err(|e| DiskError::invalid_operation(format!("bad reference pattern: {e}")))?;

        let _gate = self.inner.gate.acquire("find_replace").await;
        let candidates = SharedIter::new(self.file_tree())
            .with_filter(|n| n.is_file() && !n.is_virtual() && n.category().is_markdown_like());

        let mut changed = Vec::new();
        let mut failure = None;
        for info in candidates {
            if cancel.is_cancelled() {
                failure = Some(DiskError::Cancelled);
                break;
            }
            match self.rewrite_references(&info.path, &replacer).await {
                Ok(true) => changed.push(info.path),
                Ok(false) => {}
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !changed.is_empty() {
            self.publish(DiskEvent::index(IndexChange::Write(WritePayload {
                file_paths: changed.clone(),
            })));
        }
        tracing::info!(
            disk_id = %self.inner.id,
            pairs = pairs.len(),
            rewritten = changed.len(),
            complete = failure.is_none(),
            "find/replace batch finished"
        );
        match failure {
            Some(e) => Err(e),
            None => Ok(changed),
        }
    }

    async fn rewrite_references(&self, path: &AbsPath, replacer: &ReferenceReplacer) -> DiskResult<bool> {
        let _op = self.inner.queue.lock().await;
        let data = self
            .inner
            .backend
            .read(path)
            .await
            .map_err(|e| self.fail("read", path, e))?;
        let Ok(text) = String::from_utf8(data) else {
            tracing::debug!(path = %path, "skipping non-UTF-8 file");
            return Ok(false);
        };
        let Some(updated) = replacer.apply(&text) else {
            return Ok(false);
        };
        self.inner
            .backend
            .write(path, updated.as_bytes(), WriteOptions::existing())
            .await
            .map_err(|e| self.fail("write", path, e))?;
        Ok(true)
    }
}

use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::contract::{AccessCredential, FetchError, FileContent, RepositoryHost, TreeEntry};

/// The single text artifact handed to analysis: every included file, in
/// tree order, each preceded by a `--- File: <path> ---` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Corpus {
    document: String,
    paths: Vec<String>,
}

impl Corpus {
    fn header(path: &str) -> String {
        format!("\n\n--- File: {path} ---\n\n")
    }

    /// Bytes `file` would add to the document.
    pub fn section_len(file: &FileContent) -> usize {
        Self::header(&file.path).len() + file.raw_content.len()
    }

    pub fn push(&mut self, file: FileContent) {
        self.document.push_str(&Self::header(&file.path));
        self.document.push_str(&file.raw_content);
        self.paths.push(file.path);
    }

    pub fn as_str(&self) -> &str {
        &self.document
    }

    pub fn into_document(self) -> String {
        self.document
    }

    /// Size of the rendered document in bytes.
    pub fn len(&self) -> usize {
        self.document.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.document.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl FromIterator<FileContent> for Corpus {
    fn from_iter<I: IntoIterator<Item = FileContent>>(iter: I) -> Self {
        let mut corpus = Corpus::default();
        for file in iter {
            corpus.push(file);
        }
        corpus
    }
}

/// Optional size caps. The default is unbounded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyLimits {
    pub max_file_bytes: Option<u64>,
    pub max_corpus_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    FetchFailed(FetchError),
    Empty,
    TooLarge { bytes: u64 },
    CorpusBudgetExhausted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    pub corpus: Corpus,
    pub skipped: Vec<SkippedFile>,
}

/// Fetches blob content for tree entries and concatenates it into a [`Corpus`].
///
/// A file that cannot be fetched, decodes to nothing, or breaks a size cap is
/// left out and recorded in [`Assembly::skipped`]; it never fails the whole
/// assembly.
pub struct ContentAssembler<'a> {
    host: &'a dyn RepositoryHost,
    concurrency: usize,
    limits: AssemblyLimits,
}

impl<'a> ContentAssembler<'a> {
    pub fn new(host: &'a dyn RepositoryHost) -> Self {
        Self {
            host,
            concurrency: 1,
            limits: AssemblyLimits::default(),
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_limits(mut self, limits: AssemblyLimits) -> Self {
        self.limits = limits;
        self
    }

    pub async fn assemble(&self, entries: &[TreeEntry], credential: &AccessCredential) -> Assembly {
        let blobs: Vec<&TreeEntry> = entries.iter().filter(|e| e.is_fetchable_blob()).collect();
        info!(
            files = blobs.len(),
            concurrency = self.concurrency,
            "[ASSEMBLE] Fetching file contents"
        );

        let host = self.host;
        let limits = self.limits;
        // `buffered` yields results in submission order, so the corpus follows
        // tree order no matter which fetch finishes first.
        let mut fetches: std::pin::Pin<
            Box<dyn futures::Stream<Item = (usize, &TreeEntry, Result<String, SkipReason>)> + Send + '_>,
        > = Box::pin(stream::iter(blobs.iter().copied().enumerate())
            .map(|(index, entry)| async move {
                if let (Some(max), Some(size)) = (limits.max_file_bytes, entry.size) {
                    if size > max {
                        return (index, entry, Err(SkipReason::TooLarge { bytes: size }));
                    }
                }
                let url = entry.url.as_deref().unwrap_or_default();
                let result = host
                    .get_file_content(url, credential)
                    .await
                    .map_err(SkipReason::FetchFailed);
                (index, entry, result)
            })
            .buffered(self.concurrency));

        let mut assembly = Assembly::default();
        let mut exhausted_at = None;

        while let Some((index, entry, result)) = fetches.next().await {
            let reason = match result {
                Ok(content) if content.is_empty() => SkipReason::Empty,
                Ok(content) => {
                    let file = FileContent {
                        path: entry.path.clone(),
                        raw_content: content,
                    };
                    let bytes = file.raw_content.len() as u64;
                    if limits.max_file_bytes.is_some_and(|max| bytes > max) {
                        SkipReason::TooLarge { bytes }
                    } else if limits.max_corpus_bytes.is_some_and(|max| {
                        (assembly.corpus.len() + Corpus::section_len(&file)) as u64 > max
                    }) {
                        exhausted_at = Some(index);
                        break;
                    } else {
                        debug!(path = %file.path, bytes, "[ASSEMBLE] Included file");
                        assembly.corpus.push(file);
                        continue;
                    }
                }
                Err(reason) => reason,
            };
            warn!(path = %entry.path, reason = ?reason, "[ASSEMBLE] Skipping file");
            assembly.skipped.push(SkippedFile {
                path: entry.path.clone(),
                reason,
            });
        }

        if let Some(index) = exhausted_at {
            let remaining = &blobs[index..];
            warn!(
                remaining = remaining.len(),
                corpus_bytes = assembly.corpus.len(),
                "[ASSEMBLE] Corpus budget exhausted, leaving remaining files out"
            );
            assembly
                .skipped
                .extend(remaining.iter().map(|entry| SkippedFile {
                    path: entry.path.clone(),
                    reason: SkipReason::CorpusBudgetExhausted,
                }));
        }

        info!(
            included = assembly.corpus.paths().len(),
            skipped = assembly.skipped.len(),
            corpus_bytes = assembly.corpus.len(),
            "[ASSEMBLE] Assembly finished"
        );
        assembly
    }
}

//! Interfaces to the external subsystems the transfer core drives.
//!
//! Image storage, anonymization, and compression are separate subsystems;
//! the core only needs the narrow seams below. Failures cross the seam as
//! plain strings and are classified by the caller. In-memory
//! implementations for tests live alongside the traits.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

use imagebox_protocol::{ImageId, TagValue};

/// An image dataset as an opaque byte payload.
///
/// The transfer core imposes no format semantics; only the storage and
/// anonymization subsystems interpret the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset(Bytes);

impl Dataset {
    /// Wraps raw bytes as a dataset.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        &self.0
    }

    /// Consumes the dataset, returning its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for an empty payload.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Image store seam.
pub trait ImageStorage: Send + Sync {
    /// Fetches a dataset by image id. `Ok(None)` means the image does not
    /// exist, which callers treat as a permanent precondition failure.
    fn dataset(&self, image_id: ImageId, with_pixel_data: bool) -> Result<Option<Dataset>, String>;

    /// Stores a received dataset, returning its new image id.
    fn store_dataset(&self, dataset: Dataset) -> Result<ImageId, String>;
}

/// Anonymization seam.
pub trait Anonymizer: Send + Sync {
    /// Applies the anonymization rules plus the supplied per-image tag
    /// overrides, returning the dataset to put on the wire.
    fn anonymize(
        &self,
        image_id: ImageId,
        dataset: Dataset,
        overrides: &[TagValue],
    ) -> Result<Dataset, String>;
}

/// Payload compression seam.
pub trait Compressor: Send + Sync {
    /// Compresses outgoing payload bytes.
    fn compress(&self, bytes: Bytes) -> Result<Bytes, String>;

    /// Decompresses incoming payload bytes.
    fn decompress(&self, bytes: Bytes) -> Result<Bytes, String>;
}

/// Why an outgoing payload could not be produced.
#[derive(Error, Debug)]
pub enum PrepareError {
    /// The image does not exist in storage. Permanent: retrying cannot
    /// succeed until the archive changes.
    #[error("no dataset in storage for {0}")]
    Missing(ImageId),

    /// A pipeline stage failed. Worth retrying.
    #[error("{stage} failed: {message}")]
    Stage {
        /// Which stage broke.
        stage: &'static str,
        /// The stage's own message.
        message: String,
    },
}

impl PrepareError {
    fn stage(stage: &'static str, message: String) -> Self {
        Self::Stage { stage, message }
    }
}

/// The pluggable subsystems bundled for handing around as one unit.
#[derive(Clone)]
pub struct Collaborators {
    /// Image archive.
    pub storage: Arc<dyn ImageStorage>,
    /// Outgoing dataset scrubber.
    pub anonymizer: Arc<dyn Anonymizer>,
    /// Payload codec.
    pub compressor: Arc<dyn Compressor>,
}

impl Collaborators {
    /// Bundles the three collaborator implementations.
    pub fn new(
        storage: Arc<dyn ImageStorage>,
        anonymizer: Arc<dyn Anonymizer>,
        compressor: Arc<dyn Compressor>,
    ) -> Self {
        Self {
            storage,
            anonymizer,
            compressor,
        }
    }

    /// Runs the outgoing pipeline for one image: fetch the dataset with
    /// pixel data, anonymize it with the transfer's tag overrides, then
    /// compress the result for the wire.
    pub fn prepare_payload(
        &self,
        image_id: ImageId,
        overrides: &[TagValue],
    ) -> Result<Bytes, PrepareError> {
        let dataset = self
            .storage
            .dataset(image_id, true)
            .map_err(|message| PrepareError::stage("dataset fetch", message))?
            .ok_or(PrepareError::Missing(image_id))?;
        let scrubbed = self
            .anonymizer
            .anonymize(image_id, dataset, overrides)
            .map_err(|message| PrepareError::stage("anonymization", message))?;
        self.compressor
            .compress(scrubbed.into_bytes())
            .map_err(|message| PrepareError::stage("compression", message))
    }

    /// Decompresses a received payload into a dataset.
    pub fn decode_payload(&self, bytes: Bytes) -> Result<Dataset, String> {
        self.compressor.decompress(bytes).map(Dataset::new)
    }
}

/// In-memory image store for tests.
pub struct MemoryStorage {
    images: RwLock<HashMap<ImageId, Dataset>>,
    next_id: RwLock<u64>,
    failure: RwLock<Option<String>>,
}

impl MemoryStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            images: RwLock::new(HashMap::new()),
            next_id: RwLock::new(1),
            failure: RwLock::new(None),
        }
    }

    /// Seeds a dataset, returning its id.
    pub fn insert(&self, dataset: Dataset) -> ImageId {
        let mut next = self.next_id.write();
        let id = ImageId::new(*next);
        *next += 1;
        self.images.write().insert(id, dataset);
        id
    }

    /// Returns true if an image with the given id is stored.
    pub fn contains(&self, image_id: ImageId) -> bool {
        self.images.read().contains_key(&image_id)
    }

    /// Number of stored images.
    pub fn image_count(&self) -> usize {
        self.images.read().len()
    }

    /// Makes every subsequent call fail with the given message, or
    /// restores normal operation with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }

    fn check_failure(&self) -> Result<(), String> {
        match self.failure.read().clone() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageStorage for MemoryStorage {
    fn dataset(&self, image_id: ImageId, _with_pixel_data: bool) -> Result<Option<Dataset>, String> {
        self.check_failure()?;
        Ok(self.images.read().get(&image_id).cloned())
    }

    fn store_dataset(&self, dataset: Dataset) -> Result<ImageId, String> {
        self.check_failure()?;
        Ok(self.insert(dataset))
    }
}

/// Anonymizer for tests: passes datasets through unchanged and records
/// which overrides it was asked to apply.
pub struct RecordingAnonymizer {
    applied: RwLock<Vec<(ImageId, Vec<TagValue>)>>,
    failure: RwLock<Option<String>>,
}

impl RecordingAnonymizer {
    /// Creates a pass-through anonymizer.
    pub fn new() -> Self {
        Self {
            applied: RwLock::new(Vec::new()),
            failure: RwLock::new(None),
        }
    }

    /// Returns the (image, overrides) pairs seen so far.
    pub fn applied(&self) -> Vec<(ImageId, Vec<TagValue>)> {
        self.applied.read().clone()
    }

    /// Makes every subsequent call fail with the given message, or
    /// restores normal operation with `None`.
    pub fn set_failure(&self, message: Option<&str>) {
        *self.failure.write() = message.map(str::to_string);
    }
}

impl Default for RecordingAnonymizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Anonymizer for RecordingAnonymizer {
    fn anonymize(
        &self,
        image_id: ImageId,
        dataset: Dataset,
        overrides: &[TagValue],
    ) -> Result<Dataset, String> {
        if let Some(message) = self.failure.read().clone() {
            return Err(message);
        }
        self.applied.write().push((image_id, overrides.to_vec()));
        Ok(dataset)
    }
}

/// Marker byte prepended by [`MarkerCompressor`].
pub const COMPRESSION_MARKER: u8 = 0xC5;

/// Compressor for tests: prepends a marker byte on compress and strips it
/// on decompress, so both directions are observable in assertions.
pub struct MarkerCompressor;

impl MarkerCompressor {
    /// Creates a marker compressor.
    pub fn new() -> Self {
        Self
    }
}

impl Default for MarkerCompressor {
    fn default() -> Self {
        Self::new()
    }
}

impl Compressor for MarkerCompressor {
    fn compress(&self, bytes: Bytes) -> Result<Bytes, String> {
        let mut out = Vec::with_capacity(bytes.len() + 1);
        out.push(COMPRESSION_MARKER);
        out.extend_from_slice(&bytes);
        Ok(Bytes::from(out))
    }

    fn decompress(&self, bytes: Bytes) -> Result<Bytes, String> {
        match bytes.first() {
            Some(&COMPRESSION_MARKER) => Ok(bytes.slice(1..)),
            _ => Err("payload is missing the compression marker".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        let id = storage.insert(Dataset::new(&b"ct-slice"[..]));

        let found = storage.dataset(id, true).unwrap().unwrap();
        assert_eq!(found.bytes().as_ref(), b"ct-slice");
        assert!(storage.dataset(ImageId::new(99), true).unwrap().is_none());
    }

    #[test]
    fn memory_storage_failure_injection() {
        let storage = MemoryStorage::new();
        storage.set_failure(Some("disk offline"));
        assert_eq!(
            storage.dataset(ImageId::new(1), true).unwrap_err(),
            "disk offline"
        );

        storage.set_failure(None);
        assert!(storage.dataset(ImageId::new(1), true).is_ok());
    }

    #[test]
    fn anonymizer_records_overrides() {
        let anonymizer = RecordingAnonymizer::new();
        let overrides = vec![TagValue::new(0x0010_0010, "ANON")];
        let out = anonymizer
            .anonymize(ImageId::new(3), Dataset::new(&b"data"[..]), &overrides)
            .unwrap();

        assert_eq!(out.bytes().as_ref(), b"data");
        let applied = anonymizer.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, ImageId::new(3));
        assert_eq!(applied[0].1, overrides);
    }

    #[test]
    fn compressor_roundtrip_and_rejection() {
        let compressor = MarkerCompressor::new();
        let compressed = compressor.compress(Bytes::from_static(b"pixels")).unwrap();
        assert_eq!(compressed[0], COMPRESSION_MARKER);

        let restored = compressor.decompress(compressed).unwrap();
        assert_eq!(restored.as_ref(), b"pixels");

        assert!(compressor.decompress(Bytes::from_static(b"raw")).is_err());
    }

    fn memory_collaborators() -> (Arc<MemoryStorage>, Arc<RecordingAnonymizer>, Collaborators) {
        let storage = Arc::new(MemoryStorage::new());
        let anonymizer = Arc::new(RecordingAnonymizer::new());
        let bundle = Collaborators::new(
            Arc::clone(&storage) as Arc<dyn ImageStorage>,
            Arc::clone(&anonymizer) as Arc<dyn Anonymizer>,
            Arc::new(MarkerCompressor::new()),
        );
        (storage, anonymizer, bundle)
    }

    #[test]
    fn prepare_payload_runs_all_stages() {
        let (storage, anonymizer, bundle) = memory_collaborators();
        let id = storage.insert(Dataset::new(&b"slice"[..]));
        let overrides = vec![TagValue::new(0x0010_0010, "ANON")];

        let payload = bundle.prepare_payload(id, &overrides).unwrap();
        assert_eq!(payload[0], COMPRESSION_MARKER);
        assert_eq!(&payload[1..], b"slice");
        assert_eq!(anonymizer.applied(), vec![(id, overrides)]);
    }

    #[test]
    fn prepare_payload_missing_image() {
        let (_, _, bundle) = memory_collaborators();
        match bundle.prepare_payload(ImageId::new(42), &[]) {
            Err(PrepareError::Missing(id)) => assert_eq!(id, ImageId::new(42)),
            other => panic!("expected a missing-image error, got {other:?}"),
        }
    }

    #[test]
    fn prepare_payload_surfaces_stage_failures() {
        let (storage, anonymizer, bundle) = memory_collaborators();
        let id = storage.insert(Dataset::new(&b"slice"[..]));

        anonymizer.set_failure(Some("rules unavailable"));
        match bundle.prepare_payload(id, &[]) {
            Err(PrepareError::Stage { stage, message }) => {
                assert_eq!(stage, "anonymization");
                assert_eq!(message, "rules unavailable");
            }
            other => panic!("expected a stage error, got {other:?}"),
        }
    }

    #[test]
    fn decode_payload_reverses_prepare() {
        let (storage, _, bundle) = memory_collaborators();
        let id = storage.insert(Dataset::new(&b"slice"[..]));

        let payload = bundle.prepare_payload(id, &[]).unwrap();
        let dataset = bundle.decode_payload(payload).unwrap();
        assert_eq!(dataset.bytes().as_ref(), b"slice");
    }
}

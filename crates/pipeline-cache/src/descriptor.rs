//! Fingerprintable contents of pipeline descriptors.
//!
//! Two descriptors with equal contents produce the same [`DescriptorKey`], no
//! matter on which device or in which process they were created. The key
//! names the pipeline inside a pipeline library.
//!
//! Referenced objects (layouts, stages, attachment states) are shared through
//! [`Arc`] and recorded by their own memoized fingerprint, so a layout used by
//! many pipelines is walked only once.

use core::fmt;
use std::sync::Arc;

use gpu_persistent_cache::{
    blob::Blob,
    fingerprint::{FingerprintKey, FingerprintRecorder, Record, RecordedKey, RecordedObject},
};

use crate::shader::ShaderStage;

/// Maximum number of color attachments of a render pipeline.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// The name of a pipeline inside a pipeline library.
///
/// Displayed as a decimal number, which is the library entry name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DescriptorKey(u64);

impl DescriptorKey {
    /// Returns the key of a fingerprinted object.
    #[inline]
    #[must_use]
    pub fn of<O: RecordedObject + ?Sized>(object: &O) -> Self {
        Self(object.fingerprint_key().raw())
    }

    /// Returns the raw key value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl From<FingerprintKey> for DescriptorKey {
    #[inline]
    fn from(key: FingerprintKey) -> Self {
        Self(key.raw())
    }
}

impl fmt::Display for DescriptorKey {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Implements [`Record`] for a fieldless enum through its discriminant.
macro_rules! record_discriminant {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                #[inline]
                #[expect(clippy::as_conversions, reason = "the discriminant is the recorded value")]
                fn record_into(&self, recorder: &mut FingerprintRecorder) {
                    recorder.record(&(*self as u32));
                }
            }
        )*
    };
}

/// Pixel format of a texture or attachment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[expect(missing_docs, reason = "formats are named after their WebGPU counterparts")]
pub enum TextureFormat {
    /// No format, an unused attachment slot.
    #[default]
    Undefined,
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rgba16Float,
    R32Float,
    R32Uint,
    Rgba32Float,
    Depth16Unorm,
    Depth24Plus,
    Depth24PlusStencil8,
    Depth32Float,
}

impl TextureFormat {
    /// Returns `true` for depth and depth-stencil formats.
    #[inline]
    #[must_use]
    pub const fn is_depth_stencil(self) -> bool {
        matches!(
            self,
            Self::Depth16Unorm | Self::Depth24Plus | Self::Depth24PlusStencil8 | Self::Depth32Float
        )
    }
}

/// How vertices are assembled into primitives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[expect(missing_docs, reason = "topologies are named after their WebGPU counterparts")]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// What a bind group entry binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[expect(missing_docs, reason = "binding types are named after their WebGPU counterparts")]
pub enum BindingType {
    UniformBuffer,
    StorageBuffer,
    ReadOnlyStorageBuffer,
    Sampler,
    SampledTexture,
    StorageTexture,
}

record_discriminant!(TextureFormat, PrimitiveTopology, BindingType);

/// A set of shader stages.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderStages(u32);

impl ShaderStages {
    /// No stage.
    pub const NONE: Self = Self(0);
    /// The vertex stage.
    pub const VERTEX: Self = Self(1);
    /// The fragment stage.
    pub const FRAGMENT: Self = Self(2);
    /// The compute stage.
    pub const COMPUTE: Self = Self(4);

    /// Returns the raw bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every stage of `other` is in `self`.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl core::ops::BitOr for ShaderStages {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl From<ShaderStage> for ShaderStages {
    #[inline]
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => Self::VERTEX,
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Compute => Self::COMPUTE,
        }
    }
}

impl Record for ShaderStages {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.0);
    }
}

/// Formats and sample count of the attachments a render pipeline writes to.
///
/// This is a blueprint: it is fingerprinted to look up a render pipeline but
/// carries no GPU resources. Its fingerprint records, in this order, the
/// color-attachment mask, the format of each active color attachment by
/// increasing index, the depth-stencil format and the sample count.
#[derive(Debug, Clone)]
pub struct AttachmentState {
    /// Bit `i` is set if color attachment `i` is active.
    color_attachments_mask: u8,
    /// Format per color attachment slot, [`TextureFormat::Undefined`] if inactive.
    color_formats: [TextureFormat; MAX_COLOR_ATTACHMENTS],
    /// Depth-stencil format, [`TextureFormat::Undefined`] if there is none.
    depth_stencil_format: TextureFormat,
    /// Samples per pixel.
    sample_count: u32,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl AttachmentState {
    /// Describes the attachments of a render pass.
    ///
    /// Color slots with format [`TextureFormat::Undefined`] are inactive.
    /// Slots beyond [`MAX_COLOR_ATTACHMENTS`] are a programming error and are ignored.
    #[inline]
    #[must_use]
    pub fn new(
        color_formats: &[TextureFormat],
        depth_stencil_format: TextureFormat,
        sample_count: u32,
    ) -> Self {
        debug_assert!(
            color_formats.len() <= MAX_COLOR_ATTACHMENTS,
            "too many color attachments"
        );
        let mut formats = [TextureFormat::Undefined; MAX_COLOR_ATTACHMENTS];
        let mut mask = 0_u8;
        for ((slot, format), bit) in formats.iter_mut().zip(color_formats).zip(0_u32..) {
            if *format != TextureFormat::Undefined {
                *slot = *format;
                mask |= 1 << bit;
            }
        }
        Self {
            color_attachments_mask: mask,
            color_formats: formats,
            depth_stencil_format,
            sample_count,
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the mask of active color attachments.
    #[inline]
    #[must_use]
    pub const fn color_attachments_mask(&self) -> u8 {
        self.color_attachments_mask
    }

    /// Returns the format of color attachment `index`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the attachment is not active.
    #[inline]
    #[must_use]
    pub fn color_format(&self, index: usize) -> TextureFormat {
        debug_assert!(
            self.is_color_attachment_active(index),
            "color attachment {index} is not active"
        );
        self.color_formats
            .get(index)
            .copied()
            .unwrap_or(TextureFormat::Undefined)
    }

    /// Returns `true` if color attachment `index` is active.
    #[inline]
    #[must_use]
    pub fn is_color_attachment_active(&self, index: usize) -> bool {
        u32::try_from(index)
            .ok()
            .and_then(|bit| self.color_attachments_mask.checked_shr(bit))
            .is_some_and(|bits| bits & 1 == 1)
    }

    /// Returns `true` if there is a depth-stencil attachment.
    #[inline]
    #[must_use]
    pub fn has_depth_stencil(&self) -> bool {
        self.depth_stencil_format != TextureFormat::Undefined
    }

    /// Returns the depth-stencil format.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if there is no depth-stencil attachment.
    #[inline]
    #[must_use]
    pub fn depth_stencil_format(&self) -> TextureFormat {
        debug_assert!(self.has_depth_stencil(), "no depth-stencil attachment");
        self.depth_stencil_format
    }

    /// Returns the number of samples per pixel.
    #[inline]
    #[must_use]
    pub const fn sample_count(&self) -> u32 {
        self.sample_count
    }
}

impl RecordedObject for AttachmentState {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.color_attachments_mask);
        for (index, format) in self.color_formats.iter().enumerate() {
            if self.is_color_attachment_active(index) {
                recorder.record(format);
            }
        }
        recorder
            .record(&self.depth_stencil_format)
            .record(&self.sample_count);
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// One binding of a bind group layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct BindGroupLayoutEntry {
    /// Binding number in the shader.
    pub binding: u32,
    /// Stages that can access the binding.
    pub visibility: ShaderStages,
    /// What is bound.
    pub ty: BindingType,
}

impl BindGroupLayoutEntry {
    /// Describes one binding.
    #[inline]
    #[must_use]
    pub const fn new(binding: u32, visibility: ShaderStages, ty: BindingType) -> Self {
        Self {
            binding,
            visibility,
            ty,
        }
    }
}

impl Record for BindGroupLayoutEntry {
    #[inline]
    fn record_into(&self, recorder: &mut FingerprintRecorder) {
        recorder
            .record(&self.binding)
            .record(&self.visibility)
            .record(&self.ty);
    }
}

/// Layout of one bind group.
#[derive(Debug, Clone)]
pub struct BindGroupLayoutDescriptor {
    /// Entries sorted by binding number.
    entries: Vec<BindGroupLayoutEntry>,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl BindGroupLayoutDescriptor {
    /// Creates a layout; `entries` may be given in any order.
    #[inline]
    #[must_use]
    pub fn new(mut entries: Vec<BindGroupLayoutEntry>) -> Self {
        entries.sort_by_key(|entry| entry.binding);
        Self {
            entries,
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the entries, sorted by binding number.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[BindGroupLayoutEntry] {
        &self.entries
    }
}

impl RecordedObject for BindGroupLayoutDescriptor {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.entries);
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// Layout of all bind groups of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineLayoutDescriptor {
    /// Bind group layouts by group index.
    bind_group_layouts: Vec<Arc<BindGroupLayoutDescriptor>>,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl PipelineLayoutDescriptor {
    /// Creates a layout from bind group layouts in group order.
    #[inline]
    #[must_use]
    pub fn new(bind_group_layouts: Vec<Arc<BindGroupLayoutDescriptor>>) -> Self {
        Self {
            bind_group_layouts,
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the bind group layouts in group order.
    #[inline]
    #[must_use]
    pub fn bind_group_layouts(&self) -> &[Arc<BindGroupLayoutDescriptor>] {
        &self.bind_group_layouts
    }
}

impl RecordedObject for PipelineLayoutDescriptor {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder.record(&self.bind_group_layouts.len());
        for layout in &self.bind_group_layouts {
            recorder.record_object(layout.as_ref());
        }
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// Compiled shader bytecode and the entry point a pipeline stage runs.
#[derive(Debug, Clone)]
pub struct ProgrammableStage {
    /// The stage.
    stage: ShaderStage,
    /// Compiled bytecode.
    bytecode: Blob,
    /// Name of the entry point.
    entry_point: String,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl ProgrammableStage {
    /// Describes a stage running `entry_point` of `bytecode`.
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(stage: ShaderStage, bytecode: Blob, entry_point: S) -> Self {
        Self {
            stage,
            bytecode,
            entry_point: entry_point.into(),
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the stage.
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Returns the compiled bytecode.
    #[inline]
    #[must_use]
    pub const fn bytecode(&self) -> &Blob {
        &self.bytecode
    }

    /// Returns the entry point name.
    #[inline]
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }
}

impl RecordedObject for ProgrammableStage {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder
            .record(&self.stage)
            .record(&self.bytecode)
            .record(self.entry_point.as_str());
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// Everything that defines a compute pipeline.
#[derive(Debug, Clone)]
pub struct ComputePipelineDescriptor {
    /// The pipeline layout.
    layout: Arc<PipelineLayoutDescriptor>,
    /// The compute stage.
    compute: ProgrammableStage,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl ComputePipelineDescriptor {
    /// Describes a compute pipeline.
    #[inline]
    #[must_use]
    pub fn new(layout: Arc<PipelineLayoutDescriptor>, compute: ProgrammableStage) -> Self {
        debug_assert_eq!(compute.stage(), ShaderStage::Compute, "not a compute stage");
        Self {
            layout,
            compute,
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the pipeline layout.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &PipelineLayoutDescriptor {
        &self.layout
    }

    /// Returns the compute stage.
    #[inline]
    #[must_use]
    pub const fn compute(&self) -> &ProgrammableStage {
        &self.compute
    }

    /// Returns the name of this pipeline in a pipeline library.
    #[inline]
    #[must_use]
    pub fn descriptor_key(&self) -> DescriptorKey {
        DescriptorKey::of(self)
    }
}

impl RecordedObject for ComputePipelineDescriptor {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder
            .record_object(self.layout.as_ref())
            .record_object(&self.compute);
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

/// Everything that defines a render pipeline.
#[derive(Debug, Clone)]
pub struct RenderPipelineDescriptor {
    /// The pipeline layout.
    layout: Arc<PipelineLayoutDescriptor>,
    /// The vertex stage.
    vertex: ProgrammableStage,
    /// The fragment stage, absent for depth-only rendering.
    fragment: Option<ProgrammableStage>,
    /// How vertices form primitives.
    primitive_topology: PrimitiveTopology,
    /// Attachments written by the pipeline.
    attachment_state: Arc<AttachmentState>,
    /// Memoized fingerprint.
    recorded: RecordedKey,
}

impl RenderPipelineDescriptor {
    /// Describes a render pipeline.
    #[inline]
    #[must_use]
    pub fn new(
        layout: Arc<PipelineLayoutDescriptor>,
        vertex: ProgrammableStage,
        fragment: Option<ProgrammableStage>,
        primitive_topology: PrimitiveTopology,
        attachment_state: Arc<AttachmentState>,
    ) -> Self {
        Self {
            layout,
            vertex,
            fragment,
            primitive_topology,
            attachment_state,
            recorded: RecordedKey::new(),
        }
    }

    /// Returns the pipeline layout.
    #[inline]
    #[must_use]
    pub fn layout(&self) -> &PipelineLayoutDescriptor {
        &self.layout
    }

    /// Returns the vertex stage.
    #[inline]
    #[must_use]
    pub const fn vertex(&self) -> &ProgrammableStage {
        &self.vertex
    }

    /// Returns the fragment stage, if any.
    #[inline]
    #[must_use]
    pub const fn fragment(&self) -> Option<&ProgrammableStage> {
        self.fragment.as_ref()
    }

    /// Returns the primitive topology.
    #[inline]
    #[must_use]
    pub const fn primitive_topology(&self) -> PrimitiveTopology {
        self.primitive_topology
    }

    /// Returns the attachment state.
    #[inline]
    #[must_use]
    pub fn attachment_state(&self) -> &AttachmentState {
        &self.attachment_state
    }

    /// Returns the name of this pipeline in a pipeline library.
    #[inline]
    #[must_use]
    pub fn descriptor_key(&self) -> DescriptorKey {
        DescriptorKey::of(self)
    }
}

impl RecordedObject for RenderPipelineDescriptor {
    #[inline]
    fn fingerprint(&self, recorder: &mut FingerprintRecorder) {
        recorder
            .record_object(self.layout.as_ref())
            .record_object(&self.vertex);
        match &self.fragment {
            Some(fragment) => recorder.record(&true).record_object(fragment),
            None => recorder.record(&false),
        };
        recorder
            .record(&self.primitive_topology)
            .record_object(self.attachment_state.as_ref());
    }

    #[inline]
    fn recorded_key(&self) -> &RecordedKey {
        &self.recorded
    }
}

//! Pipeline libraries on Direct3D 12 (`ID3D12PipelineLibrary`).
//!
//! [`D3d12Device`] is the surface of the native API this crate needs; an FFI
//! wrapper implements it by forwarding to `ID3D12Device1` and
//! `ID3D12PipelineLibrary`. [`D3d12Backend`] turns its `HRESULT`s into the
//! vocabulary of [`PipelineBackend`].

use core::fmt;

use gpu_persistent_cache::key::PersistentCacheKey;

use crate::backend::{CompiledPipeline, DescriptorOf, PipelineBackend, PipelineDescriptor, StoreStatus};

/// A Windows `HRESULT` status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HResult(pub i32);

impl HResult {
    /// Success.
    pub const S_OK: Self = Self(0);
    /// Success with a qualification.
    pub const S_FALSE: Self = Self(1);
    /// Unspecified failure.
    pub const E_FAIL: Self = Self::from_bits(0x8000_4005);
    /// An invalid argument; for pipeline libraries "no such name" on load
    /// and "name already present" on store.
    pub const E_INVALIDARG: Self = Self::from_bits(0x8007_0057);
    /// Out of memory.
    pub const E_OUTOFMEMORY: Self = Self::from_bits(0x8007_000e);
    /// The operation is not supported.
    pub const DXGI_ERROR_UNSUPPORTED: Self = Self::from_bits(0x887a_0004);
    /// The serialized library was created by another adapter.
    pub const D3D12_ERROR_ADAPTER_NOT_FOUND: Self = Self::from_bits(0x887e_0001);
    /// The serialized library was created by another driver version.
    pub const D3D12_ERROR_DRIVER_VERSION_MISMATCH: Self = Self::from_bits(0x887e_0002);

    /// Interprets the bits of an unsigned status code.
    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(i32::from_ne_bytes(bits.to_ne_bytes()))
    }

    /// Returns the status code as unsigned bits.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> u32 {
        u32::from_ne_bytes(self.0.to_ne_bytes())
    }

    /// Returns `true` for success codes.
    #[inline]
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }
}

impl fmt::Display for HResult {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HRESULT {:#010x}", self.bits())
    }
}

/// An error indicating that a native D3D12 call failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("`{call}` failed with {hresult}")]
#[non_exhaustive]
pub struct D3d12Error {
    /// The failed native call.
    pub call: &'static str,
    /// Its status code.
    pub hresult: HResult,
}

impl D3d12Error {
    /// Attributes `hresult` to `call`.
    #[inline]
    #[must_use]
    pub const fn new(call: &'static str, hresult: HResult) -> Self {
        Self { call, hresult }
    }
}

/// PCI identity of a D3D12 adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct D3d12PciInfo {
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// PCI subsystem id.
    pub sub_sys_id: u32,
}

impl D3d12PciInfo {
    /// Describes an adapter.
    #[inline]
    #[must_use]
    pub const fn new(vendor_id: u32, device_id: u32, sub_sys_id: u32) -> Self {
        Self {
            vendor_id,
            device_id,
            sub_sys_id,
        }
    }
}

/// The native D3D12 entry points used for pipeline libraries.
///
/// Failing calls return their `HRESULT` unchanged; [`D3d12Backend`] decides
/// which codes mean a miss.
pub trait D3d12Device: Send + Sync + 'static {
    /// `ID3D12PipelineLibrary`, which is free-threaded.
    type Library: Send + Sync;
    /// `ID3D12PipelineState`.
    type PipelineState: Clone;
    /// `D3D12_GRAPHICS_PIPELINE_STATE_DESC`.
    type GraphicsDesc: ?Sized;
    /// `D3D12_COMPUTE_PIPELINE_STATE_DESC`.
    type ComputeDesc: ?Sized;

    /// Returns the PCI identity of the adapter.
    fn pci_info(&self) -> D3d12PciInfo;

    /// Returns `true` if `D3D12_FEATURE_SHADER_CACHE` reports library support.
    fn supports_pipeline_library(&self) -> bool;

    /// `ID3D12Device1::CreatePipelineLibrary`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call.
    fn create_pipeline_library(&self, blob: &[u8]) -> Result<Self::Library, HResult>;

    /// `ID3D12PipelineLibrary::LoadGraphicsPipeline`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call, `E_INVALIDARG` for an unknown name.
    fn load_graphics_pipeline(
        &self,
        library: &Self::Library,
        name: &str,
        desc: &Self::GraphicsDesc,
    ) -> Result<Self::PipelineState, HResult>;

    /// `ID3D12PipelineLibrary::LoadComputePipeline`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call, `E_INVALIDARG` for an unknown name.
    fn load_compute_pipeline(
        &self,
        library: &Self::Library,
        name: &str,
        desc: &Self::ComputeDesc,
    ) -> Result<Self::PipelineState, HResult>;

    /// `ID3D12Device::CreateGraphicsPipelineState`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call.
    fn create_graphics_pipeline_state(
        &self,
        desc: &Self::GraphicsDesc,
    ) -> Result<Self::PipelineState, HResult>;

    /// `ID3D12Device::CreateComputePipelineState`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call.
    fn create_compute_pipeline_state(
        &self,
        desc: &Self::ComputeDesc,
    ) -> Result<Self::PipelineState, HResult>;

    /// `ID3D12PipelineLibrary::StorePipeline`.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call, `E_INVALIDARG` if the name is taken.
    fn store_pipeline(
        &self,
        library: &mut Self::Library,
        name: &str,
        pipeline: &Self::PipelineState,
    ) -> Result<(), HResult>;

    /// `ID3D12PipelineLibrary::GetSerializedSize`.
    fn library_serialized_size(&self, library: &Self::Library) -> usize;

    /// `ID3D12PipelineLibrary::Serialize` into a buffer of the serialized size.
    ///
    /// # Errors
    ///
    /// Returns the `HRESULT` of a failed call.
    fn serialize_library(&self, library: &Self::Library, data: &mut [u8]) -> Result<(), HResult>;
}

/// [`PipelineBackend`] on top of a [`D3d12Device`].
#[derive(Debug)]
pub struct D3d12Backend<D> {
    /// The native device.
    device: D,
}

impl<D: D3d12Device> D3d12Backend<D> {
    /// Wraps a native device.
    #[inline]
    pub const fn new(device: D) -> Self {
        Self { device }
    }

    /// Returns the native device.
    #[inline]
    pub const fn device(&self) -> &D {
        &self.device
    }
}

impl<D: D3d12Device> PipelineBackend for D3d12Backend<D> {
    type Library = D::Library;
    type Pipeline = D::PipelineState;
    type GraphicsDesc = D::GraphicsDesc;
    type ComputeDesc = D::ComputeDesc;
    type Error = D3d12Error;

    #[inline]
    fn supports_pipeline_library(&self) -> bool {
        self.device.supports_pipeline_library()
    }

    #[inline]
    fn pipeline_cache_key(&self) -> PersistentCacheKey {
        let info = self.device.pci_info();
        PersistentCacheKey::builder()
            .hex(info.device_id)
            .hex(info.vendor_id)
            .hex(info.sub_sys_id)
            .build()
    }

    #[inline]
    fn create_library(&self, data: &[u8]) -> Result<Self::Library, Self::Error> {
        self.device
            .create_pipeline_library(data)
            .map_err(|hresult| D3d12Error::new("ID3D12Device1::CreatePipelineLibrary", hresult))
    }

    #[inline]
    fn load_pipeline(
        &self,
        library: &Self::Library,
        name: &str,
        descriptor: DescriptorOf<'_, Self>,
    ) -> Result<Option<Self::Pipeline>, Self::Error> {
        let (call, result) = match descriptor {
            PipelineDescriptor::Graphics(desc) => (
                "ID3D12PipelineLibrary::LoadGraphicsPipeline",
                self.device.load_graphics_pipeline(library, name, desc),
            ),
            PipelineDescriptor::Compute(desc) => (
                "ID3D12PipelineLibrary::LoadComputePipeline",
                self.device.load_compute_pipeline(library, name, desc),
            ),
        };
        match result {
            Ok(pipeline) => Ok(Some(pipeline)),
            Err(HResult::E_INVALIDARG) => Ok(None),
            Err(hresult) => Err(D3d12Error::new(call, hresult)),
        }
    }

    #[inline]
    fn create_pipeline(
        &self,
        _library: Option<&Self::Library>,
        descriptor: DescriptorOf<'_, Self>,
    ) -> Result<CompiledPipeline<Self::Pipeline>, Self::Error> {
        let pipeline = match descriptor {
            PipelineDescriptor::Graphics(desc) => self
                .device
                .create_graphics_pipeline_state(desc)
                .map_err(|hresult| D3d12Error::new("ID3D12Device::CreateGraphicsPipelineState", hresult)),
            PipelineDescriptor::Compute(desc) => self
                .device
                .create_compute_pipeline_state(desc)
                .map_err(|hresult| D3d12Error::new("ID3D12Device::CreateComputePipelineState", hresult)),
        }?;
        Ok(CompiledPipeline::compiled(pipeline))
    }

    #[inline]
    fn store_pipeline(
        &self,
        library: &mut Self::Library,
        name: &str,
        pipeline: &Self::Pipeline,
    ) -> Result<StoreStatus, Self::Error> {
        match self.device.store_pipeline(library, name, pipeline) {
            Ok(()) => Ok(StoreStatus::Stored),
            Err(HResult::E_INVALIDARG) => Ok(StoreStatus::AlreadyPresent),
            Err(hresult) => Err(D3d12Error::new("ID3D12PipelineLibrary::StorePipeline", hresult)),
        }
    }

    #[inline]
    fn serialize_library(&self, library: &Self::Library) -> Result<Vec<u8>, Self::Error> {
        let size = self.device.library_serialized_size(library);
        let mut data = vec![0_u8; size];
        self.device
            .serialize_library(library, &mut data)
            .map_err(|hresult| D3d12Error::new("ID3D12PipelineLibrary::Serialize", hresult))?;
        log::trace!("serialized D3D12 pipeline library into {size} bytes");
        Ok(data)
    }
}

#[cfg(test)]
mod test {
    use parking_lot::Mutex;
    use rustc_hash::FxHashMap;

    use super::*;

    /// Library entries by name; a pipeline is the string it was compiled from.
    type Entries = FxHashMap<String, String>;

    #[derive(Default)]
    struct ScriptedDevice {
        load_failure: Mutex<Option<HResult>>,
    }

    impl D3d12Device for ScriptedDevice {
        type Library = Entries;
        type PipelineState = String;
        type GraphicsDesc = str;
        type ComputeDesc = str;

        fn pci_info(&self) -> D3d12PciInfo {
            D3d12PciInfo::new(0x10de, 0x1f08, 0x3fb)
        }

        fn supports_pipeline_library(&self) -> bool {
            true
        }

        fn create_pipeline_library(&self, blob: &[u8]) -> Result<Entries, HResult> {
            if blob.is_empty() {
                Ok(Entries::default())
            } else {
                Err(HResult::D3D12_ERROR_DRIVER_VERSION_MISMATCH)
            }
        }

        fn load_graphics_pipeline(
            &self,
            library: &Entries,
            name: &str,
            desc: &str,
        ) -> Result<String, HResult> {
            self.load_compute_pipeline(library, name, desc)
        }

        fn load_compute_pipeline(
            &self,
            library: &Entries,
            name: &str,
            _desc: &str,
        ) -> Result<String, HResult> {
            if let Some(hresult) = *self.load_failure.lock() {
                return Err(hresult);
            }
            library.get(name).cloned().ok_or(HResult::E_INVALIDARG)
        }

        fn create_graphics_pipeline_state(&self, desc: &str) -> Result<String, HResult> {
            Ok(desc.to_owned())
        }

        fn create_compute_pipeline_state(&self, desc: &str) -> Result<String, HResult> {
            if desc.is_empty() {
                Err(HResult::E_FAIL)
            } else {
                Ok(desc.to_owned())
            }
        }

        fn store_pipeline(
            &self,
            library: &mut Entries,
            name: &str,
            pipeline: &String,
        ) -> Result<(), HResult> {
            if library.contains_key(name) {
                return Err(HResult::E_INVALIDARG);
            }
            library.insert(name.to_owned(), pipeline.clone());
            Ok(())
        }

        fn library_serialized_size(&self, library: &Entries) -> usize {
            library.len()
        }

        fn serialize_library(&self, _library: &Entries, data: &mut [u8]) -> Result<(), HResult> {
            data.fill(0xd3);
            Ok(())
        }
    }

    fn backend() -> D3d12Backend<ScriptedDevice> {
        D3d12Backend::new(ScriptedDevice::default())
    }

    #[test_log::test]
    fn hresult_codes() {
        assert!(HResult::S_OK.is_success());
        assert!(HResult::S_FALSE.is_success());
        assert!(!HResult::E_INVALIDARG.is_success());
        assert_eq!(HResult::E_INVALIDARG.bits(), 0x8007_0057);
        assert_eq!(HResult::E_INVALIDARG.to_string(), "HRESULT 0x80070057");
    }

    #[test_log::test]
    fn cache_key_is_device_vendor_subsystem() {
        assert_eq!(backend().pipeline_cache_key().to_string(), "1f0810de3fb");
    }

    #[test_log::test]
    fn invalid_argument_on_load_is_a_miss() {
        let backend = backend();
        let library = backend.create_library(&[]).unwrap();
        let loaded = backend
            .load_pipeline(&library, "1", PipelineDescriptor::Compute("cs"))
            .unwrap();
        assert_eq!(loaded, None);
    }

    #[test_log::test]
    fn other_load_failures_propagate() {
        let backend = backend();
        let library = backend.create_library(&[]).unwrap();
        *backend.device().load_failure.lock() = Some(HResult::E_OUTOFMEMORY);
        let err = backend
            .load_pipeline(&library, "1", PipelineDescriptor::Graphics("vs"))
            .unwrap_err();
        assert_eq!(err.hresult, HResult::E_OUTOFMEMORY);
        assert_eq!(err.call, "ID3D12PipelineLibrary::LoadGraphicsPipeline");
    }

    #[test_log::test]
    fn invalid_argument_on_store_is_already_present() {
        let backend = backend();
        let mut library = backend.create_library(&[]).unwrap();
        let compiled = backend
            .create_pipeline(Some(&library), PipelineDescriptor::Compute("cs"))
            .unwrap();
        assert!(!compiled.library_hit);
        let pipeline = compiled.pipeline;
        assert_eq!(
            backend.store_pipeline(&mut library, "7", &pipeline).unwrap(),
            StoreStatus::Stored
        );
        assert_eq!(
            backend.store_pipeline(&mut library, "7", &pipeline).unwrap(),
            StoreStatus::AlreadyPresent
        );
        let loaded = backend
            .load_pipeline(&library, "7", PipelineDescriptor::Compute("cs"))
            .unwrap();
        assert_eq!(loaded.as_deref(), Some("cs"));
    }

    #[test_log::test]
    fn compile_failures_propagate() {
        let err = backend()
            .create_pipeline(None, PipelineDescriptor::Compute(""))
            .unwrap_err();
        assert_eq!(err.hresult, HResult::E_FAIL);
    }

    #[test_log::test]
    fn incompatible_library_data_is_an_error() {
        let err = backend().create_library(b"stale").unwrap_err();
        assert_eq!(err.hresult, HResult::D3D12_ERROR_DRIVER_VERSION_MISMATCH);
    }

    #[test_log::test]
    fn serializes_into_a_buffer_of_the_reported_size() {
        let backend = backend();
        let mut library = backend.create_library(&[]).unwrap();
        backend
            .store_pipeline(&mut library, "1", &"cs".to_owned())
            .unwrap();
        backend
            .store_pipeline(&mut library, "2", &"cs".to_owned())
            .unwrap();
        assert_eq!(backend.serialize_library(&library).unwrap(), vec![0xd3, 0xd3]);
    }
}

// ============================================================================
// ONNX Runtime backend - inpainting model loaded through the C API
// ============================================================================
//
// Uses `libloading` to dynamically load onnxruntime.dll / libonnxruntime.so
// at runtime so the binary has NO compile-time dependency on ONNX Runtime.
// The runtime and model paths come from the settings file or the CLI.
//
// One environment + session is created at startup and kept for the whole
// process; each fill only creates and releases its own tensors.

#![allow(unsafe_op_in_unsafe_fn)]

use std::ffi::{CStr, CString, c_char, c_void};
use std::path::Path;

use image::Rgb32FImage;

use super::inference::{InpaintModel, Inferencer};
use super::mask::Mask;
use super::scale::ModelSize;

/// Errors that can occur during ONNX Runtime operations.
#[derive(Debug)]
pub enum OnnxError {
    DllNotFound(String),
    DllLoadFailed(String),
    ModelNotFound(String),
    ModelLoadFailed(String),
    ApiInitFailed(String),
    SessionCreateFailed(String),
    InferenceFailed(String),
    InvalidOutput(String),
}

impl std::fmt::Display for OnnxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnnxError::DllNotFound(p) => write!(f, "ONNX Runtime library not found: {}", p),
            OnnxError::DllLoadFailed(e) => write!(f, "Failed to load ONNX Runtime library: {}", e),
            OnnxError::ModelNotFound(p) => write!(f, "ONNX model file not found: {}", p),
            OnnxError::ModelLoadFailed(e) => write!(f, "Failed to load ONNX model: {}", e),
            OnnxError::ApiInitFailed(e) => write!(f, "ONNX Runtime API init failed: {}", e),
            OnnxError::SessionCreateFailed(e) => write!(f, "Failed to create ONNX session: {}", e),
            OnnxError::InferenceFailed(e) => write!(f, "ONNX inference failed: {}", e),
            OnnxError::InvalidOutput(e) => write!(f, "Invalid ONNX output: {}", e),
        }
    }
}

impl std::error::Error for OnnxError {}

// --- ONNX Runtime C API types --------------------------------------
// Opaque handles (never dereferenced in Rust - used as `*mut` pointers only)

#[repr(C)]
struct OrtEnv {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtSession {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtSessionOptions {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtValue {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtMemoryInfo {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtStatus {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtRunOptions {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtAllocator {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtTensorTypeAndShapeInfo {
    _private: [u8; 0],
}
#[repr(C)]
struct OrtTypeInfo {
    _private: [u8; 0],
}

/// ORT API version we target (vtable layout of ONNX Runtime 1.16+)
const ORT_API_VERSION: u32 = 18;

/// Minimum supported ONNX Runtime version.
const ORT_MIN_VERSION: (u32, u32) = (1, 16);

/// ORT_ENABLE_ALL
const GRAPH_OPT_ENABLE_ALL: u32 = 99;

#[allow(dead_code)]
#[repr(u32)]
enum OrtLoggingLevel {
    Verbose = 0,
    Info = 1,
    Warning = 2,
    Error = 3,
    Fatal = 4,
}

#[allow(dead_code)]
#[repr(u32)]
enum ONNXTensorElementDataType {
    Undefined = 0,
    Float = 1,
}

#[repr(i32)]
#[allow(dead_code)]
enum OrtAllocatorType {
    Invalid = -1,
    DeviceAllocator = 0,
    ArenaAllocator = 1,
}

#[repr(i32)]
#[allow(dead_code)]
enum OrtMemType {
    CpuInput = -2,
    CpuOutput = -1,
    Default = 0,
}

/// Model paths are `wchar_t*` on Windows and `char*` everywhere else.
#[cfg(target_os = "windows")]
type OrtChar = u16;
#[cfg(not(target_os = "windows"))]
type OrtChar = c_char;

type CreateEnvFn = unsafe extern "C" fn(
    log_level: OrtLoggingLevel,
    logid: *const c_char,
    out: *mut *mut OrtEnv,
) -> *mut OrtStatus;

type CreateSessionOptionsFn = unsafe extern "C" fn(out: *mut *mut OrtSessionOptions) -> *mut OrtStatus;

type CreateSessionFn = unsafe extern "C" fn(
    env: *const OrtEnv,
    model_path: *const OrtChar,
    options: *const OrtSessionOptions,
    out: *mut *mut OrtSession,
) -> *mut OrtStatus;

type CreateTensorWithDataAsOrtValueFn = unsafe extern "C" fn(
    info: *const OrtMemoryInfo,
    data: *mut c_void,
    data_len: usize,
    shape: *const i64,
    shape_len: usize,
    element_type: ONNXTensorElementDataType,
    out: *mut *mut OrtValue,
) -> *mut OrtStatus;

type CreateCpuMemoryInfoFn = unsafe extern "C" fn(
    alloc_type: OrtAllocatorType,
    mem_type: OrtMemType,
    out: *mut *mut OrtMemoryInfo,
) -> *mut OrtStatus;

type RunFn = unsafe extern "C" fn(
    session: *mut OrtSession,
    run_options: *const OrtRunOptions,
    input_names: *const *const c_char,
    inputs: *const *const OrtValue,
    input_count: usize,
    output_names: *const *const c_char,
    output_count: usize,
    outputs: *mut *mut OrtValue,
) -> *mut OrtStatus;

type GetTensorMutableDataFn =
    unsafe extern "C" fn(value: *mut OrtValue, out: *mut *mut c_void) -> *mut OrtStatus;

type GetTensorTypeAndShapeFn = unsafe extern "C" fn(
    value: *const OrtValue,
    out: *mut *mut OrtTensorTypeAndShapeInfo,
) -> *mut OrtStatus;

type GetDimensionsCountFn =
    unsafe extern "C" fn(info: *const OrtTensorTypeAndShapeInfo, out: *mut usize) -> *mut OrtStatus;

type GetDimensionsFn = unsafe extern "C" fn(
    info: *const OrtTensorTypeAndShapeInfo,
    dim_values: *mut i64,
    dim_values_length: usize,
) -> *mut OrtStatus;

type ReleaseEnvFn = unsafe extern "C" fn(env: *mut OrtEnv);
type ReleaseSessionFn = unsafe extern "C" fn(session: *mut OrtSession);
type ReleaseSessionOptionsFn = unsafe extern "C" fn(options: *mut OrtSessionOptions);
type ReleaseValueFn = unsafe extern "C" fn(value: *mut OrtValue);
type ReleaseMemoryInfoFn = unsafe extern "C" fn(info: *mut OrtMemoryInfo);
type ReleaseTensorTypeAndShapeInfoFn = unsafe extern "C" fn(info: *mut OrtTensorTypeAndShapeInfo);
type ReleaseStatusFn = unsafe extern "C" fn(status: *mut OrtStatus);
type ReleaseTypeInfoFn = unsafe extern "C" fn(type_info: *mut OrtTypeInfo);
type GetErrorMessageFn = unsafe extern "C" fn(status: *const OrtStatus) -> *const c_char;
type SetIntraOpNumThreadsFn =
    unsafe extern "C" fn(options: *mut OrtSessionOptions, intra_op_num_threads: i32) -> *mut OrtStatus;
type SetSessionGraphOptimizationLevelFn =
    unsafe extern "C" fn(options: *mut OrtSessionOptions, level: u32) -> *mut OrtStatus;
type SessionGetCountFn =
    unsafe extern "C" fn(session: *const OrtSession, out: *mut usize) -> *mut OrtStatus;
type SessionGetNameFn = unsafe extern "C" fn(
    session: *const OrtSession,
    index: usize,
    allocator: *mut OrtAllocator,
    out: *mut *mut c_char,
) -> *mut OrtStatus;
type GetAllocatorWithDefaultOptionsFn =
    unsafe extern "C" fn(out: *mut *mut OrtAllocator) -> *mut OrtStatus;
type AllocatorFreeFn =
    unsafe extern "C" fn(allocator: *mut OrtAllocator, ptr: *mut c_void) -> *mut OrtStatus;
type SessionGetInputTypeInfoFn = unsafe extern "C" fn(
    session: *const OrtSession,
    index: usize,
    type_info: *mut *mut OrtTypeInfo,
) -> *mut OrtStatus;
type CastTypeInfoToTensorInfoFn = unsafe extern "C" fn(
    type_info: *const OrtTypeInfo,
    out: *mut *const OrtTensorTypeAndShapeInfo,
) -> *mut OrtStatus;

/// OrtApiBase - the entry point struct returned by OrtGetApiBase()
#[repr(C)]
struct OrtApiBase {
    get_api: unsafe extern "C" fn(version: u32) -> *const c_void,
    get_version_string: unsafe extern "C" fn() -> *const c_char,
}

/// The OrtApi vtable: an array of function pointers indexed by position in
/// `onnxruntime_c_api.h`.
struct OrtApi {
    raw: *const c_void,
}

impl OrtApi {
    unsafe fn get_fn<T>(&self, index: usize) -> T {
        let ptr = self.raw as *const *const c_void;
        let fn_ptr = *ptr.add(index);
        std::mem::transmute_copy(&fn_ptr)
    }

    //  2: GetErrorMessage   3: CreateEnv        7: CreateSession    9: Run
    // 10: CreateSessionOptions                  23: SetSessionGraphOptimizationLevel
    // 24: SetIntraOpNumThreads                  30/31: SessionGetInput/OutputCount
    // 33: SessionGetInputTypeInfo               36/37: SessionGetInput/OutputName
    // 49: CreateTensorWithDataAsOrtValue        51: GetTensorMutableData
    // 55: CastTypeInfoToTensorInfo              61/62: GetDimensionsCount/GetDimensions
    // 65: GetTensorTypeAndShape                 69: CreateCpuMemoryInfo
    // 76: AllocatorFree                         78: GetAllocatorWithDefaultOptions
    // 92..100: Release{Env,Status,MemoryInfo,Session,Value,RunOptions,TypeInfo,
    //          TensorTypeAndShapeInfo,SessionOptions}

    fn get_error_message(&self) -> GetErrorMessageFn {
        unsafe { self.get_fn(2) }
    }
    fn create_env(&self) -> CreateEnvFn {
        unsafe { self.get_fn(3) }
    }
    fn create_session(&self) -> CreateSessionFn {
        unsafe { self.get_fn(7) }
    }
    fn run(&self) -> RunFn {
        unsafe { self.get_fn(9) }
    }
    fn create_session_options(&self) -> CreateSessionOptionsFn {
        unsafe { self.get_fn(10) }
    }
    fn set_session_graph_optimization_level(&self) -> SetSessionGraphOptimizationLevelFn {
        unsafe { self.get_fn(23) }
    }
    fn set_intra_op_num_threads(&self) -> SetIntraOpNumThreadsFn {
        unsafe { self.get_fn(24) }
    }
    fn session_get_input_count(&self) -> SessionGetCountFn {
        unsafe { self.get_fn(30) }
    }
    fn session_get_output_count(&self) -> SessionGetCountFn {
        unsafe { self.get_fn(31) }
    }
    fn session_get_input_type_info(&self) -> SessionGetInputTypeInfoFn {
        unsafe { self.get_fn(33) }
    }
    fn session_get_input_name(&self) -> SessionGetNameFn {
        unsafe { self.get_fn(36) }
    }
    fn session_get_output_name(&self) -> SessionGetNameFn {
        unsafe { self.get_fn(37) }
    }
    fn create_tensor_with_data(&self) -> CreateTensorWithDataAsOrtValueFn {
        unsafe { self.get_fn(49) }
    }
    fn get_tensor_mutable_data(&self) -> GetTensorMutableDataFn {
        unsafe { self.get_fn(51) }
    }
    fn cast_type_info_to_tensor_info(&self) -> CastTypeInfoToTensorInfoFn {
        unsafe { self.get_fn(55) }
    }
    fn get_dimensions_count(&self) -> GetDimensionsCountFn {
        unsafe { self.get_fn(61) }
    }
    fn get_dimensions(&self) -> GetDimensionsFn {
        unsafe { self.get_fn(62) }
    }
    fn get_tensor_type_and_shape(&self) -> GetTensorTypeAndShapeFn {
        unsafe { self.get_fn(65) }
    }
    fn create_cpu_memory_info(&self) -> CreateCpuMemoryInfoFn {
        unsafe { self.get_fn(69) }
    }
    fn allocator_free(&self) -> AllocatorFreeFn {
        unsafe { self.get_fn(76) }
    }
    fn get_allocator_with_default_options(&self) -> GetAllocatorWithDefaultOptionsFn {
        unsafe { self.get_fn(78) }
    }
    fn release_env(&self) -> ReleaseEnvFn {
        unsafe { self.get_fn(92) }
    }
    fn release_status(&self) -> ReleaseStatusFn {
        unsafe { self.get_fn(93) }
    }
    fn release_memory_info(&self) -> ReleaseMemoryInfoFn {
        unsafe { self.get_fn(94) }
    }
    fn release_session(&self) -> ReleaseSessionFn {
        unsafe { self.get_fn(95) }
    }
    fn release_value(&self) -> ReleaseValueFn {
        unsafe { self.get_fn(96) }
    }
    fn release_type_info(&self) -> ReleaseTypeInfoFn {
        unsafe { self.get_fn(98) }
    }
    fn release_tensor_type_and_shape_info(&self) -> ReleaseTensorTypeAndShapeInfoFn {
        unsafe { self.get_fn(99) }
    }
    fn release_session_options(&self) -> ReleaseSessionOptionsFn {
        unsafe { self.get_fn(100) }
    }
}

/// Turn an OrtStatus into a Result, releasing the status.
unsafe fn status_to_result(api: &OrtApi, status: *mut OrtStatus) -> Result<(), String> {
    if status.is_null() {
        Ok(())
    } else {
        let msg_ptr = (api.get_error_message())(status);
        let msg = if msg_ptr.is_null() {
            "Unknown error".to_string()
        } else {
            CStr::from_ptr(msg_ptr).to_string_lossy().into_owned()
        };
        (api.release_status())(status);
        Err(msg)
    }
}

/// Validate that an ONNX library/model path is safe to load:
/// absolute, no `..` components, and the right file extension.
pub fn validate_onnx_path(path: &str, for_dll: bool) -> Result<(), OnnxError> {
    use std::path::Component;
    let p = Path::new(path);

    if path.is_empty() {
        return Err(if for_dll {
            OnnxError::DllNotFound("path is empty".to_string())
        } else {
            OnnxError::ModelNotFound("path is empty".to_string())
        });
    }

    if !p.is_absolute() {
        return Err(OnnxError::DllLoadFailed(format!(
            "ONNX path must be absolute: {}",
            path
        )));
    }

    if p.components().any(|c| c == Component::ParentDir) {
        return Err(OnnxError::DllLoadFailed(
            "ONNX path must not contain '..' components".to_string(),
        ));
    }

    let ext = p
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();
    if for_dll {
        if !["dll", "so", "dylib"].contains(&ext.as_str()) {
            return Err(OnnxError::DllLoadFailed(format!(
                "Expected a .dll/.so/.dylib file, got '.{}'",
                ext
            )));
        }
    } else if ext != "onnx" {
        return Err(OnnxError::ModelLoadFailed(format!(
            "Expected a .onnx model file, got '.{}'",
            ext
        )));
    }

    Ok(())
}

/// Parse a version string like "1.18.0" into (major, minor).
fn parse_ort_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major: u32 = parts.next()?.trim().parse().ok()?;
    let minor: u32 = parts.next()?.trim().parse().ok()?;
    Some((major, minor))
}

fn check_min_version(version: &str) -> Result<(), OnnxError> {
    if let Some((major, minor)) = parse_ort_version(version) {
        let (min_major, min_minor) = ORT_MIN_VERSION;
        if major < min_major || (major == min_major && minor < min_minor) {
            return Err(OnnxError::ApiInitFailed(format!(
                "ONNX Runtime {} is too old, need {}.{} or newer",
                version, min_major, min_minor
            )));
        }
    }
    Ok(())
}

/// Load the library and return its OrtApi vtable plus version string.
unsafe fn open_runtime(dll_path: &str) -> Result<(libloading::Library, OrtApi, String), OnnxError> {
    validate_onnx_path(dll_path, true)?;
    if !Path::new(dll_path).exists() {
        return Err(OnnxError::DllNotFound(dll_path.to_string()));
    }

    let lib = libloading::Library::new(dll_path)
        .map_err(|e| OnnxError::DllLoadFailed(e.to_string()))?;

    let api_base = {
        let get_api_base: libloading::Symbol<unsafe extern "C" fn() -> *const OrtApiBase> = lib
            .get(b"OrtGetApiBase")
            .map_err(|e| OnnxError::DllLoadFailed(format!("Symbol OrtGetApiBase not found: {}", e)))?;
        get_api_base()
    };
    if api_base.is_null() {
        return Err(OnnxError::ApiInitFailed(
            "OrtGetApiBase returned null".to_string(),
        ));
    }

    let version_ptr = ((*api_base).get_version_string)();
    let version = if version_ptr.is_null() {
        "unknown".to_string()
    } else {
        CStr::from_ptr(version_ptr).to_string_lossy().into_owned()
    };
    check_min_version(&version)?;

    let api_ptr = ((*api_base).get_api)(ORT_API_VERSION);
    if api_ptr.is_null() {
        return Err(OnnxError::ApiInitFailed(format!(
            "OrtGetApi({}) returned null for runtime {}",
            ORT_API_VERSION, version
        )));
    }

    Ok((lib, OrtApi { raw: api_ptr }, version))
}

/// Probe the runtime library without loading a model. Returns its version.
pub fn probe_onnx_runtime(dll_path: &str) -> Result<String, OnnxError> {
    unsafe { open_runtime(dll_path).map(|(_lib, _api, version)| version) }
}

// --- Tensor layout -------------------------------------------------

/// Memory order of the model's image tensors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    /// `[1, H, W, C]` - Keras / TensorFlow exports.
    Nhwc,
    /// `[1, C, H, W]` - PyTorch exports.
    Nchw,
}

impl TensorLayout {
    /// Detect layout (and static spatial size, if any) from an input shape.
    /// Dynamic dimensions are reported by ORT as -1. Only 4-D RGB inputs
    /// with the channel dim at position 1 or last can be fed.
    pub fn detect(dims: &[i64]) -> Result<(Self, Option<ModelSize>), OnnxError> {
        let spatial = |h: i64, w: i64| {
            if h > 0 && w > 0 {
                Some(ModelSize::new(w as u32, h as u32))
            } else {
                None
            }
        };
        match dims {
            [_, 3, h, w] => Ok((TensorLayout::Nchw, spatial(*h, *w))),
            [_, h, w, 3] => Ok((TensorLayout::Nhwc, spatial(*h, *w))),
            _ => Err(OnnxError::SessionCreateFailed(format!(
                "unsupported input shape {:?}, expected [1,3,H,W] or [1,H,W,3]",
                dims
            ))),
        }
    }

    fn shape(&self, size: ModelSize, channels: i64) -> [i64; 4] {
        let (h, w) = (size.height as i64, size.width as i64);
        match self {
            TensorLayout::Nhwc => [1, h, w, channels],
            TensorLayout::Nchw => [1, channels, h, w],
        }
    }

    /// Flatten an RGB float image into this layout.
    pub fn pack(&self, img: &Rgb32FImage) -> Vec<f32> {
        match self {
            TensorLayout::Nhwc => img.as_raw().clone(),
            TensorLayout::Nchw => {
                let plane = (img.width() * img.height()) as usize;
                let mut out = vec![0.0f32; plane * 3];
                for (i, px) in img.pixels().enumerate() {
                    out[i] = px.0[0];
                    out[plane + i] = px.0[1];
                    out[2 * plane + i] = px.0[2];
                }
                out
            }
        }
    }
}

/// Rebuild an RGB float image from an output tensor.
pub fn unpack_output(data: &[f32], dims: &[i64]) -> Result<Rgb32FImage, OnnxError> {
    let (layout, size) = match dims {
        [1, 3, h, w] | [3, h, w] => (TensorLayout::Nchw, (*h, *w)),
        [1, h, w, 3] | [h, w, 3] => (TensorLayout::Nhwc, (*h, *w)),
        _ => {
            return Err(OnnxError::InvalidOutput(format!(
                "unsupported output shape {:?}, expected an RGB image tensor",
                dims
            )));
        }
    };
    let (h, w) = size;
    if h <= 0 || w <= 0 {
        return Err(OnnxError::InvalidOutput(format!("empty output shape {:?}", dims)));
    }
    let (h, w) = (h as u32, w as u32);
    let plane = (h as usize) * (w as usize);
    if data.len() != plane * 3 {
        return Err(OnnxError::InvalidOutput(format!(
            "output has {} values, shape {:?} needs {}",
            data.len(),
            dims,
            plane * 3
        )));
    }

    let raw = match layout {
        TensorLayout::Nhwc => data.to_vec(),
        TensorLayout::Nchw => {
            let mut out = Vec::with_capacity(plane * 3);
            for i in 0..plane {
                out.push(data[i]);
                out.push(data[plane + i]);
                out.push(data[2 * plane + i]);
            }
            out
        }
    };
    Rgb32FImage::from_raw(w, h, raw)
        .ok_or_else(|| OnnxError::InvalidOutput("output buffer size mismatch".to_string()))
}

// --- Session -------------------------------------------------------

/// An inpainting model held open for the lifetime of the process.
pub struct OnnxModel {
    api: OrtApi,
    env: *mut OrtEnv,
    session_options: *mut OrtSessionOptions,
    session: *mut OrtSession,
    memory_info: *mut OrtMemoryInfo,
    /// Input 0 = masked image, optional input 1 = mask.
    input_names: Vec<CString>,
    output_name: CString,
    layout: TensorLayout,
    size: ModelSize,
    label: String,
    // Dropped last: every pointer above points into this library.
    _lib: libloading::Library,
}

// The raw handles are only mutated in `load` and `Drop`; ORT documents
// `OrtSession::Run` as safe to call concurrently.
unsafe impl Send for OnnxModel {}
unsafe impl Sync for OnnxModel {}

impl OnnxModel {
    /// Load the runtime library and create a session for `model_path`.
    ///
    /// `fallback_size` is used when the model declares dynamic spatial dims.
    pub fn load(
        dll_path: &str,
        model_path: &str,
        fallback_size: ModelSize,
    ) -> Result<Self, OnnxError> {
        validate_onnx_path(model_path, false)?;
        if !Path::new(model_path).exists() {
            return Err(OnnxError::ModelNotFound(model_path.to_string()));
        }

        log_info!("Loading ONNX Runtime from {}", dll_path);
        let (lib, api, version) = unsafe { open_runtime(dll_path)? };
        log_info!("ONNX Runtime {} loaded", version);

        let model_name = Path::new(model_path)
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.to_string());

        // Handles start null; Drop releases whatever was created if a later
        // step fails.
        let mut model = OnnxModel {
            api,
            env: std::ptr::null_mut(),
            session_options: std::ptr::null_mut(),
            session: std::ptr::null_mut(),
            memory_info: std::ptr::null_mut(),
            input_names: Vec::new(),
            output_name: CString::default(),
            layout: TensorLayout::Nhwc,
            size: fallback_size,
            label: format!("{} (ORT {})", model_name, version),
            _lib: lib,
        };

        unsafe { model.init_session(model_path, fallback_size)? };

        log_info!(
            "Model {} ready: {:?} input {}, {} input(s)",
            model.label,
            model.layout,
            model.size,
            model.input_names.len()
        );
        Ok(model)
    }

    unsafe fn init_session(
        &mut self,
        model_path: &str,
        fallback_size: ModelSize,
    ) -> Result<(), OnnxError> {
        let api = &self.api;

        status_to_result(
            api,
            (api.create_env())(OrtLoggingLevel::Warning, c"InpaintFE".as_ptr(), &mut self.env),
        )
        .map_err(OnnxError::ApiInitFailed)?;

        status_to_result(api, (api.create_session_options())(&mut self.session_options))
            .map_err(OnnxError::SessionCreateFailed)?;

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4) as i32;
        let _ = status_to_result(
            api,
            (api.set_intra_op_num_threads())(self.session_options, threads),
        );
        let _ = status_to_result(
            api,
            (api.set_session_graph_optimization_level())(self.session_options, GRAPH_OPT_ENABLE_ALL),
        );

        let path_chars = model_path_chars(model_path)?;
        status_to_result(
            api,
            (api.create_session())(
                self.env,
                path_chars.as_ptr(),
                self.session_options,
                &mut self.session,
            ),
        )
        .map_err(OnnxError::ModelLoadFailed)?;

        let mut allocator: *mut OrtAllocator = std::ptr::null_mut();
        status_to_result(api, (api.get_allocator_with_default_options())(&mut allocator))
            .map_err(|e| OnnxError::SessionCreateFailed(format!("Get allocator: {}", e)))?;

        let mut input_count = 0usize;
        status_to_result(
            api,
            (api.session_get_input_count())(self.session, &mut input_count),
        )
        .map_err(|e| OnnxError::SessionCreateFailed(format!("Get input count: {}", e)))?;
        let mut output_count = 0usize;
        status_to_result(
            api,
            (api.session_get_output_count())(self.session, &mut output_count),
        )
        .map_err(|e| OnnxError::SessionCreateFailed(format!("Get output count: {}", e)))?;
        if input_count == 0 || output_count == 0 {
            return Err(OnnxError::SessionCreateFailed(format!(
                "model has {} input(s) and {} output(s)",
                input_count, output_count
            )));
        }

        for i in 0..input_count.min(2) {
            let name = session_name(api, self.session, i, allocator, true)?;
            self.input_names.push(name);
        }
        self.output_name = session_name(api, self.session, 0, allocator, false)?;

        let dims = input_dims(api, self.session, 0);
        let (layout, declared) = TensorLayout::detect(&dims)?;
        self.layout = layout;
        self.size = match declared {
            Some(size) => size,
            None => {
                log_warn!(
                    "Model input shape {:?} has dynamic spatial dims, using {}",
                    dims,
                    fallback_size
                );
                fallback_size
            }
        };

        status_to_result(
            api,
            (api.create_cpu_memory_info())(
                OrtAllocatorType::ArenaAllocator,
                OrtMemType::Default,
                &mut self.memory_info,
            ),
        )
        .map_err(|e| OnnxError::SessionCreateFailed(format!("Create memory info: {}", e)))?;

        Ok(())
    }

    /// Wrap `data` in an OrtValue without copying. `data` must outlive the value.
    unsafe fn tensor(&self, data: &mut [f32], shape: &[i64; 4]) -> Result<*mut OrtValue, OnnxError> {
        let api = &self.api;
        let mut value: *mut OrtValue = std::ptr::null_mut();
        status_to_result(
            api,
            (api.create_tensor_with_data())(
                self.memory_info,
                data.as_mut_ptr() as *mut c_void,
                std::mem::size_of_val(data),
                shape.as_ptr(),
                shape.len(),
                ONNXTensorElementDataType::Float,
                &mut value,
            ),
        )
        .map_err(|e| OnnxError::InferenceFailed(format!("Create input tensor: {}", e)))?;
        Ok(value)
    }

    unsafe fn run_session(&self, masked: &Rgb32FImage, mask: &Mask) -> Result<Rgb32FImage, OnnxError> {
        let api = &self.api;

        let mut image_data = self.layout.pack(masked);
        let image_shape = self.layout.shape(self.size, 3);
        // One channel: NCHW and NHWC share the same memory order
        let mut mask_data = mask.as_raw().to_vec();
        let mask_shape = self.layout.shape(self.size, 1);

        let mut inputs: Vec<*mut OrtValue> = Vec::with_capacity(2);
        let release_inputs = |inputs: &[*mut OrtValue]| {
            for &v in inputs {
                (api.release_value())(v);
            }
        };

        match self.tensor(&mut image_data, &image_shape) {
            Ok(v) => inputs.push(v),
            Err(e) => return Err(e),
        }
        if self.input_names.len() > 1 {
            match self.tensor(&mut mask_data, &mask_shape) {
                Ok(v) => inputs.push(v),
                Err(e) => {
                    release_inputs(&inputs);
                    return Err(e);
                }
            }
        }

        let input_name_ptrs: Vec<*const c_char> =
            self.input_names.iter().map(|n| n.as_ptr()).collect();
        let input_ptrs: Vec<*const OrtValue> = inputs.iter().map(|&v| v as *const _).collect();
        let output_names = [self.output_name.as_ptr()];
        let mut output: *mut OrtValue = std::ptr::null_mut();

        let run_status = (api.run())(
            self.session,
            std::ptr::null(),
            input_name_ptrs.as_ptr(),
            input_ptrs.as_ptr(),
            input_ptrs.len(),
            output_names.as_ptr(),
            1,
            &mut output,
        );
        release_inputs(&inputs);
        status_to_result(api, run_status).map_err(OnnxError::InferenceFailed)?;
        if output.is_null() {
            return Err(OnnxError::InvalidOutput("run produced no output".to_string()));
        }

        let result = self.read_output(output);
        (api.release_value())(output);
        result
    }

    unsafe fn read_output(&self, output: *mut OrtValue) -> Result<Rgb32FImage, OnnxError> {
        let api = &self.api;
        let mut info: *mut OrtTensorTypeAndShapeInfo = std::ptr::null_mut();
        status_to_result(api, (api.get_tensor_type_and_shape())(output, &mut info))
            .map_err(OnnxError::InvalidOutput)?;
        let dims = tensor_info_dims(api, info);
        (api.release_tensor_type_and_shape_info())(info);
        let dims = dims?;

        let total: i64 = dims.iter().product();
        if total <= 0 {
            return Err(OnnxError::InvalidOutput(format!("output shape {:?}", dims)));
        }

        let mut data_ptr: *mut c_void = std::ptr::null_mut();
        status_to_result(api, (api.get_tensor_mutable_data())(output, &mut data_ptr))
            .map_err(|e| OnnxError::InvalidOutput(format!("Get tensor data: {}", e)))?;
        if data_ptr.is_null() {
            return Err(OnnxError::InvalidOutput("null tensor data".to_string()));
        }
        let data = std::slice::from_raw_parts(data_ptr as *const f32, total as usize);
        unpack_output(data, &dims)
    }
}

impl InpaintModel for OnnxModel {
    fn name(&self) -> &str {
        &self.label
    }

    fn input_size(&self) -> ModelSize {
        self.size
    }

    fn predict(&self, masked: &Rgb32FImage, mask: &Mask) -> Result<Rgb32FImage, String> {
        unsafe { self.run_session(masked, mask) }.map_err(|e| {
            log_err!("{}", e);
            e.to_string()
        })
    }
}

impl Drop for OnnxModel {
    fn drop(&mut self) {
        let api = &self.api;
        unsafe {
            if !self.memory_info.is_null() {
                (api.release_memory_info())(self.memory_info);
            }
            if !self.session.is_null() {
                (api.release_session())(self.session);
            }
            if !self.session_options.is_null() {
                (api.release_session_options())(self.session_options);
            }
            if !self.env.is_null() {
                (api.release_env())(self.env);
            }
        }
    }
}

/// Load the configured model once at startup. Any failure is remembered by
/// the returned [`Inferencer`] and reported on every fill.
pub fn load_inferencer(dll_path: &str, model_path: &str, fallback_size: ModelSize) -> Inferencer {
    if dll_path.trim().is_empty() {
        return Inferencer::unavailable("ONNX Runtime library path is not configured");
    }
    if model_path.trim().is_empty() {
        return Inferencer::unavailable("inpainting model path is not configured");
    }
    Inferencer::from_load(
        OnnxModel::load(dll_path, model_path, fallback_size)
            .map(|m| Box::new(m) as Box<dyn InpaintModel>),
    )
}

#[cfg(target_os = "windows")]
fn model_path_chars(path: &str) -> Result<Vec<OrtChar>, OnnxError> {
    Ok(path.encode_utf16().chain(std::iter::once(0)).collect())
}

#[cfg(not(target_os = "windows"))]
fn model_path_chars(path: &str) -> Result<Vec<OrtChar>, OnnxError> {
    let c = CString::new(path)
        .map_err(|_| OnnxError::ModelLoadFailed("model path contains a NUL byte".to_string()))?;
    Ok(c.as_bytes_with_nul().iter().map(|&b| b as OrtChar).collect())
}

/// Name of input/output `index`, copied out of ORT's allocator.
unsafe fn session_name(
    api: &OrtApi,
    session: *mut OrtSession,
    index: usize,
    allocator: *mut OrtAllocator,
    input: bool,
) -> Result<CString, OnnxError> {
    let getter = if input {
        api.session_get_input_name()
    } else {
        api.session_get_output_name()
    };
    let mut name_ptr: *mut c_char = std::ptr::null_mut();
    status_to_result(api, getter(session, index, allocator, &mut name_ptr))
        .map_err(|e| OnnxError::SessionCreateFailed(format!("Get tensor name: {}", e)))?;
    if name_ptr.is_null() {
        return Err(OnnxError::SessionCreateFailed(format!(
            "tensor {} has no name",
            index
        )));
    }
    let name = CStr::from_ptr(name_ptr).to_owned();
    (api.allocator_free())(allocator, name_ptr as *mut c_void);
    Ok(name)
}

/// Declared shape of input `index`; empty when ORT cannot report it.
unsafe fn input_dims(api: &OrtApi, session: *mut OrtSession, index: usize) -> Vec<i64> {
    let mut type_info: *mut OrtTypeInfo = std::ptr::null_mut();
    if status_to_result(
        api,
        (api.session_get_input_type_info())(session, index, &mut type_info),
    )
    .is_err()
        || type_info.is_null()
    {
        return Vec::new();
    }
    let mut tensor_info: *const OrtTensorTypeAndShapeInfo = std::ptr::null();
    let dims = if status_to_result(
        api,
        (api.cast_type_info_to_tensor_info())(type_info, &mut tensor_info),
    )
    .is_ok()
        && !tensor_info.is_null()
    {
        // tensor_info is owned by type_info - not released separately
        tensor_info_dims(api, tensor_info).unwrap_or_default()
    } else {
        Vec::new()
    };
    (api.release_type_info())(type_info);
    dims
}

unsafe fn tensor_info_dims(
    api: &OrtApi,
    info: *const OrtTensorTypeAndShapeInfo,
) -> Result<Vec<i64>, OnnxError> {
    let mut count = 0usize;
    status_to_result(api, (api.get_dimensions_count())(info, &mut count))
        .map_err(OnnxError::InvalidOutput)?;
    let mut dims = vec![0i64; count];
    status_to_result(api, (api.get_dimensions())(info, dims.as_mut_ptr(), count))
        .map_err(OnnxError::InvalidOutput)?;
    Ok(dims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_validate_rejects_relative_and_traversal() {
        assert!(validate_onnx_path("", true).is_err());
        assert!(validate_onnx_path("models/lama.onnx", false).is_err());
        #[cfg(not(target_os = "windows"))]
        {
            assert!(validate_onnx_path("/opt/ort/../evil/libonnxruntime.so", true).is_err());
            assert!(validate_onnx_path("/opt/ort/libonnxruntime.so", true).is_ok());
            assert!(validate_onnx_path("/opt/models/model-06.onnx", false).is_ok());
            assert!(validate_onnx_path("/opt/models/model-06.keras", false).is_err());
            assert!(validate_onnx_path("/opt/models/model-06.onnx", true).is_err());
        }
    }

    #[test]
    fn test_version_gate() {
        assert_eq!(parse_ort_version("1.18.0"), Some((1, 18)));
        assert!(check_min_version("1.15.1").is_err());
        assert!(check_min_version("1.16.0").is_ok());
        assert!(check_min_version("2.0.0").is_ok());
        assert!(check_min_version("unknown").is_ok());
    }

    #[test]
    fn test_layout_detection() {
        assert_eq!(
            TensorLayout::detect(&[1, 512, 512, 3]).unwrap(),
            (TensorLayout::Nhwc, Some(ModelSize::square(512)))
        );
        assert_eq!(
            TensorLayout::detect(&[1, 3, 256, 320]).unwrap(),
            (TensorLayout::Nchw, Some(ModelSize::new(320, 256)))
        );
        assert_eq!(TensorLayout::detect(&[-1, -1, -1, 3]).unwrap(), (TensorLayout::Nhwc, None));
        assert_eq!(TensorLayout::detect(&[-1, 3, -1, -1]).unwrap(), (TensorLayout::Nchw, None));
    }

    #[test]
    fn test_layout_rejects_non_rgb_inputs() {
        let rejected: [&[i64]; 6] = [
            &[1, 4, 512, 512],
            &[1, 512, 512, 4],
            &[1, 1, 512, 512],
            &[3, 512, 512],
            &[512, 512, 3],
            &[],
        ];
        for dims in rejected {
            let err = TensorLayout::detect(dims).unwrap_err();
            assert!(
                matches!(err, OnnxError::SessionCreateFailed(_)),
                "{:?} gave {:?}",
                dims,
                err
            );
        }
    }

    #[test]
    fn test_rejected_input_shape_makes_model_unavailable() {
        let err = TensorLayout::detect(&[1, 4, 256, 256]).map(|_| ()).unwrap_err();
        let inf = Inferencer::from_load(Err::<Box<dyn InpaintModel>, _>(err));
        match inf.model_size() {
            Err(crate::error::FillError::ModelUnavailable(reason)) => {
                assert!(reason.contains("[1, 4, 256, 256]"), "got {}", reason)
            }
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_pack_nchw_is_planar() {
        let img = Rgb32FImage::from_fn(2, 1, |x, _| {
            if x == 0 { Rgb([0.1, 0.2, 0.3]) } else { Rgb([0.4, 0.5, 0.6]) }
        });
        assert_eq!(TensorLayout::Nchw.pack(&img), vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6]);
        assert_eq!(TensorLayout::Nhwc.pack(&img), vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_unpack_output_layouts_agree() {
        let planar = [0.1, 0.4, 0.2, 0.5, 0.3, 0.6];
        let interleaved = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6];
        let a = unpack_output(&planar, &[1, 3, 1, 2]).unwrap();
        let b = unpack_output(&interleaved, &[1, 1, 2, 3]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.get_pixel(1, 0).0, [0.4, 0.5, 0.6]);
    }

    #[test]
    fn test_unpack_output_rejects_bad_shapes() {
        assert!(unpack_output(&[0.0; 4], &[1, 1, 2, 2]).is_err());
        assert!(unpack_output(&[0.0; 5], &[1, 1, 2, 3]).is_err());
    }

    #[test]
    fn test_runtime_check_fails_before_loading_anything() {
        let err = probe_onnx_runtime("lib/libonnxruntime.so").unwrap_err();
        assert!(matches!(err, OnnxError::DllLoadFailed(_)), "got {:?}", err);
        assert!(matches!(probe_onnx_runtime(""), Err(OnnxError::DllNotFound(_))));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("libonnxruntime.so");
        let err = probe_onnx_runtime(&missing.to_string_lossy()).unwrap_err();
        assert!(matches!(err, OnnxError::DllNotFound(_)), "got {:?}", err);
    }

    #[test]
    fn test_load_reports_missing_model() {
        #[cfg(not(target_os = "windows"))]
        let model = "/nonexistent/inpaint.onnx";
        #[cfg(target_os = "windows")]
        let model = "C:\\nonexistent\\inpaint.onnx";
        let err = OnnxModel::load("/nonexistent/libonnxruntime.so", model, ModelSize::default())
            .err()
            .expect("load must fail");
        assert!(matches!(err, OnnxError::ModelNotFound(_)), "got {:?}", err);
    }

    #[test]
    fn test_unconfigured_paths_make_model_unavailable() {
        let inf = load_inferencer("", "/opt/models/model-06.onnx", ModelSize::default());
        assert!(!inf.is_available());
        let inf = load_inferencer("/opt/ort/libonnxruntime.so", "  ", ModelSize::default());
        assert!(matches!(
            inf.model_size(),
            Err(crate::error::FillError::ModelUnavailable(_))
        ));
    }
}

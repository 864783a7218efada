//! ### English
//! GBM/DRM dma-buf allocation backend.
//!
//! Loads the minimal `libgbm` symbol set at runtime (no link-time dependency,
//! same loader pattern as the EGL layer), opens a DRM node, and allocates
//! linear buffer objects whose fds become export descriptors.
//!
//! ### 中文
//! GBM/DRM dma-buf 分配后端。
//!
//! 运行时加载最小的 `libgbm` 符号集合（无链接期依赖，与 EGL 层相同的
//! loader 模式），打开 DRM 节点，并分配 linear buffer object，其 fd 即为
//! 导出描述符。

use std::ffi::{CStr, c_int, c_void};
use std::os::fd::{FromRawFd, OwnedFd};

use dpi::PhysicalSize;

use crate::engine::alloc::{
    AllocationBacking, ExternalAllocation, FrameAllocator, RawMapping, validate_request,
};
use crate::engine::error::AllocationError;
use crate::engine::layout::{FrameRequest, ImageLayout};

/// ### English
/// `GBM_BO_USE_LINEAR`: CPU-mappable, no tiling — required for pitch-addressed
/// CPU writes.
///
/// ### 中文
/// `GBM_BO_USE_LINEAR`：可被 CPU 映射、无 tiling —— 按行距寻址的 CPU 写入
/// 所必需。
const GBM_BO_USE_LINEAR: u32 = 1 << 4;
/// ### English
/// `GBM_BO_TRANSFER_WRITE`: map hint for write-only access.
///
/// ### 中文
/// `GBM_BO_TRANSFER_WRITE`：只写访问的映射提示。
const GBM_BO_TRANSFER_WRITE: u32 = 1 << 1;

/// ### English
/// DRM nodes probed in order. Render nodes first: they need no display server
/// and no master privileges.
///
/// ### 中文
/// 依次探测的 DRM 节点。render 节点优先：它们既不需要显示服务器，
/// 也不需要 master 权限。
const DRM_NODE_CANDIDATES: [&CStr; 3] = [c"/dev/dri/renderD128", c"/dev/dri/card0", c"/dev/dri/card1"];

#[repr(C)]
pub(crate) struct GbmDevice {
    _private: [u8; 0],
}

#[repr(C)]
pub(crate) struct GbmBo {
    _private: [u8; 0],
}

type GbmCreateDevice = unsafe extern "C" fn(c_int) -> *mut GbmDevice;
type GbmDeviceDestroy = unsafe extern "C" fn(*mut GbmDevice);
type GbmBoCreate = unsafe extern "C" fn(*mut GbmDevice, u32, u32, u32, u32) -> *mut GbmBo;
type GbmBoDestroy = unsafe extern "C" fn(*mut GbmBo);
type GbmBoGetStride = unsafe extern "C" fn(*mut GbmBo) -> u32;
type GbmBoGetFd = unsafe extern "C" fn(*mut GbmBo) -> c_int;
type GbmBoMap = unsafe extern "C" fn(
    *mut GbmBo,
    u32,
    u32,
    u32,
    u32,
    u32,
    *mut u32,
    *mut *mut c_void,
) -> *mut c_void;
type GbmBoUnmap = unsafe extern "C" fn(*mut GbmBo, *mut c_void);

/// ### English
/// Loaded minimal GBM API (buffer-object creation, mapping, and fd export).
///
/// ### 中文
/// 已加载的最小 GBM API（buffer object 创建、映射与 fd 导出）。
#[derive(Clone, Copy)]
pub(crate) struct GbmApi {
    gbm_create_device: GbmCreateDevice,
    gbm_device_destroy: GbmDeviceDestroy,
    gbm_bo_create: GbmBoCreate,
    gbm_bo_destroy: GbmBoDestroy,
    gbm_bo_get_stride: GbmBoGetStride,
    gbm_bo_get_fd: GbmBoGetFd,
    gbm_bo_map: GbmBoMap,
    gbm_bo_unmap: GbmBoUnmap,
}

/// ### English
/// Looks up one symbol in an already-opened library handle.
///
/// ### 中文
/// 在已打开的库句柄中查找一个符号。
unsafe fn sym(lib: *mut c_void, name: &CStr) -> Result<*mut c_void, String> {
    let ptr = unsafe { libc::dlsym(lib, name.as_ptr()) };
    if ptr.is_null() {
        return Err(format!("libgbm is missing symbol {name:?}"));
    }
    Ok(ptr)
}

impl GbmApi {
    /// ### English
    /// Loads the required `libgbm` symbols via `dlopen`.
    ///
    /// ### 中文
    /// 通过 `dlopen` 加载所需的 `libgbm` 符号。
    pub(crate) fn load() -> Result<Self, String> {
        let mut lib = unsafe { libc::dlopen(c"libgbm.so.1".as_ptr(), libc::RTLD_NOW) };
        if lib.is_null() {
            lib = unsafe { libc::dlopen(c"libgbm.so".as_ptr(), libc::RTLD_NOW) };
        }
        if lib.is_null() {
            return Err("libgbm could not be loaded".to_string());
        }

        unsafe {
            Ok(Self {
                gbm_create_device: std::mem::transmute::<*mut c_void, GbmCreateDevice>(sym(
                    lib,
                    c"gbm_create_device",
                )?),
                gbm_device_destroy: std::mem::transmute::<*mut c_void, GbmDeviceDestroy>(sym(
                    lib,
                    c"gbm_device_destroy",
                )?),
                gbm_bo_create: std::mem::transmute::<*mut c_void, GbmBoCreate>(sym(
                    lib,
                    c"gbm_bo_create",
                )?),
                gbm_bo_destroy: std::mem::transmute::<*mut c_void, GbmBoDestroy>(sym(
                    lib,
                    c"gbm_bo_destroy",
                )?),
                gbm_bo_get_stride: std::mem::transmute::<*mut c_void, GbmBoGetStride>(sym(
                    lib,
                    c"gbm_bo_get_stride",
                )?),
                gbm_bo_get_fd: std::mem::transmute::<*mut c_void, GbmBoGetFd>(sym(
                    lib,
                    c"gbm_bo_get_fd",
                )?),
                gbm_bo_map: std::mem::transmute::<*mut c_void, GbmBoMap>(sym(lib, c"gbm_bo_map")?),
                gbm_bo_unmap: std::mem::transmute::<*mut c_void, GbmBoUnmap>(sym(
                    lib,
                    c"gbm_bo_unmap",
                )?),
            })
        }
    }
}

/// ### English
/// Allocator producing dma-buf frames from a GBM device.
///
/// ### 中文
/// 从 GBM 设备产生 dma-buf 帧的分配器。
pub struct GbmAllocator {
    api: GbmApi,
    device: *mut GbmDevice,
    // Keeps the DRM node open for the device's lifetime.
    _drm: OwnedFd,
}

// The device pointer is only used from the owning producer thread.
unsafe impl Send for GbmAllocator {}

impl GbmAllocator {
    /// ### English
    /// Loads libgbm and opens the first usable DRM node.
    ///
    /// ### 中文
    /// 加载 libgbm 并打开第一个可用的 DRM 节点。
    pub fn open() -> Result<Self, AllocationError> {
        let api = GbmApi::load().map_err(AllocationError::DeviceUnavailable)?;

        for node in DRM_NODE_CANDIDATES {
            let raw = unsafe { libc::open(node.as_ptr(), libc::O_RDWR | libc::O_CLOEXEC) };
            if raw < 0 {
                continue;
            }
            let drm = unsafe { OwnedFd::from_raw_fd(raw) };
            let device = unsafe { (api.gbm_create_device)(raw) };
            if device.is_null() {
                continue;
            }
            return Ok(Self {
                api,
                device,
                _drm: drm,
            });
        }

        Err(AllocationError::DeviceUnavailable(
            "no usable DRM node (tried renderD128, card0, card1)".to_string(),
        ))
    }
}

impl FrameAllocator for GbmAllocator {
    fn allocate(&mut self, request: FrameRequest) -> Result<ExternalAllocation, AllocationError> {
        validate_request(&request)?;

        let bo = unsafe {
            (self.api.gbm_bo_create)(
                self.device,
                request.size.width,
                request.size.height,
                request.format.drm_fourcc(),
                GBM_BO_USE_LINEAR,
            )
        };
        if bo.is_null() {
            return Err(AllocationError::Backing(format!(
                "gbm_bo_create({}x{}) failed: {}",
                request.size.width,
                request.size.height,
                std::io::Error::last_os_error()
            )));
        }

        let pitch = unsafe { (self.api.gbm_bo_get_stride)(bo) };
        let layout = ImageLayout {
            size: request.size,
            format: request.format,
            pitch,
        };
        let backing = GbmBacking {
            api: self.api,
            bo,
            size: request.size,
            pitch,
            map_data: std::ptr::null_mut(),
        };
        Ok(ExternalAllocation::new(layout, Box::new(backing)))
    }
}

impl Drop for GbmAllocator {
    fn drop(&mut self) {
        unsafe {
            (self.api.gbm_device_destroy)(self.device);
        }
    }
}

/// ### English
/// One GBM buffer object plus its live map handle (if mapped).
///
/// ### 中文
/// 一个 GBM buffer object 及其存活的映射句柄（若已映射）。
struct GbmBacking {
    api: GbmApi,
    bo: *mut GbmBo,
    size: PhysicalSize<u32>,
    pitch: u32,
    map_data: *mut c_void,
}

unsafe impl Send for GbmBacking {}

impl AllocationBacking for GbmBacking {
    fn map_for_write(&mut self) -> Result<RawMapping, String> {
        if !self.map_data.is_null() {
            return Err("GBM buffer object is already mapped".to_string());
        }

        let mut stride: u32 = 0;
        let mut map_data: *mut c_void = std::ptr::null_mut();
        let ptr = unsafe {
            (self.api.gbm_bo_map)(
                self.bo,
                0,
                0,
                self.size.width,
                self.size.height,
                GBM_BO_TRANSFER_WRITE,
                &mut stride,
                &mut map_data,
            )
        };
        if ptr.is_null() || ptr == libc::MAP_FAILED {
            return Err(format!(
                "gbm_bo_map failed: {}",
                std::io::Error::last_os_error()
            ));
        }
        if stride != self.pitch {
            unsafe { (self.api.gbm_bo_unmap)(self.bo, map_data) };
            return Err(format!(
                "gbm_bo_map stride {stride} disagrees with allocation pitch {}",
                self.pitch
            ));
        }

        self.map_data = map_data;
        Ok(RawMapping {
            ptr: ptr.cast::<u8>(),
            len: self.pitch as usize * self.size.height as usize,
        })
    }

    fn unmap(&mut self) {
        if !self.map_data.is_null() {
            unsafe { (self.api.gbm_bo_unmap)(self.bo, self.map_data) };
            self.map_data = std::ptr::null_mut();
        }
    }

    fn export(&mut self) -> Result<OwnedFd, String> {
        let raw = unsafe { (self.api.gbm_bo_get_fd)(self.bo) };
        if raw < 0 {
            return Err(format!(
                "gbm_bo_get_fd failed: {}",
                std::io::Error::last_os_error()
            ));
        }
        Ok(unsafe { OwnedFd::from_raw_fd(raw) })
    }
}

impl Drop for GbmBacking {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            (self.api.gbm_bo_destroy)(self.bo);
        }
    }
}

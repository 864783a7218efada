//! ### English
//! EGL/GLES2 backend: dma-buf import through `EGL_EXT_image_dma_buf_import`
//! and textured drawing into a pbuffer surface.
//!
//! The EGL entry points are loaded at runtime with `dlopen`, the extension
//! entry points through `eglGetProcAddress`, so the crate links against
//! nothing. Import happens with `EGL_NO_CONTEXT` — the EGLImage is a
//! display-level object, which is what lets producer threads import without
//! owning the render context. Binding attaches the EGLImage to a reused
//! texture name with `glEGLImageTargetTexture2DOES`; no pixel data moves at
//! any point.
//!
//! ### 中文
//! EGL/GLES2 后端：通过 `EGL_EXT_image_dma_buf_import` 导入 dma-buf，
//! 并以贴图方式绘制到 pbuffer 表面。
//!
//! EGL 入口点在运行时用 `dlopen` 加载，扩展入口点通过
//! `eglGetProcAddress` 获取，因此 crate 不链接任何库。导入使用
//! `EGL_NO_CONTEXT` —— EGLImage 是 display 级对象，这正是生产者线程
//! 无需持有渲染上下文即可导入的原因。绑定用
//! `glEGLImageTargetTexture2DOES` 把 EGLImage 挂到复用的纹理名上；
//! 全程不搬运任何像素数据。

use std::ffi::{CStr, CString, c_char, c_void};
use std::num::NonZeroU32;
use std::os::fd::AsRawFd;
use std::sync::Arc;

use dpi::PhysicalSize;
use glow::HasContext;

use crate::engine::error::{BindError, DeviceContextError, ImportError};
use crate::engine::gpu::{DescriptorImporter, GpuContext};
use crate::engine::image::{ExportDescriptor, ImageBacking, ImportedImage};
use crate::engine::slots::TextureSlot;

type EGLDisplay = *mut c_void;
type EGLConfig = *mut c_void;
type EGLContext = *mut c_void;
type EGLSurface = *mut c_void;
type EGLImageKHR = *mut c_void;
type EGLint = i32;
type EGLBoolean = u32;
type EGLenum = u32;

const EGL_FALSE: EGLBoolean = 0;
const EGL_NO_DISPLAY: EGLDisplay = std::ptr::null_mut();
const EGL_NO_CONTEXT: EGLContext = std::ptr::null_mut();
const EGL_NO_SURFACE: EGLSurface = std::ptr::null_mut();
const EGL_NO_IMAGE_KHR: EGLImageKHR = std::ptr::null_mut();

const EGL_ALPHA_SIZE: EGLint = 0x3021;
const EGL_BLUE_SIZE: EGLint = 0x3022;
const EGL_GREEN_SIZE: EGLint = 0x3023;
const EGL_RED_SIZE: EGLint = 0x3024;
const EGL_SURFACE_TYPE: EGLint = 0x3033;
const EGL_NONE: EGLint = 0x3038;
const EGL_RENDERABLE_TYPE: EGLint = 0x3040;
const EGL_PBUFFER_BIT: EGLint = 0x0001;
const EGL_OPENGL_ES2_BIT: EGLint = 0x0004;
const EGL_HEIGHT: EGLint = 0x3056;
const EGL_WIDTH: EGLint = 0x3057;
const EGL_CONTEXT_CLIENT_VERSION: EGLint = 0x3098;

// EGL_EXT_image_dma_buf_import
const EGL_LINUX_DMA_BUF_EXT: EGLenum = 0x3270;
const EGL_LINUX_DRM_FOURCC_EXT: EGLint = 0x3271;
const EGL_DMA_BUF_PLANE0_FD_EXT: EGLint = 0x3272;
const EGL_DMA_BUF_PLANE0_OFFSET_EXT: EGLint = 0x3273;
const EGL_DMA_BUF_PLANE0_PITCH_EXT: EGLint = 0x3274;

const GL_TEXTURE_2D: u32 = 0x0DE1;

type EglGetDisplay = unsafe extern "C" fn(*mut c_void) -> EGLDisplay;
type EglInitialize = unsafe extern "C" fn(EGLDisplay, *mut EGLint, *mut EGLint) -> EGLBoolean;
type EglChooseConfig = unsafe extern "C" fn(
    EGLDisplay,
    *const EGLint,
    *mut EGLConfig,
    EGLint,
    *mut EGLint,
) -> EGLBoolean;
type EglCreateContext =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, EGLContext, *const EGLint) -> EGLContext;
type EglCreatePbufferSurface =
    unsafe extern "C" fn(EGLDisplay, EGLConfig, *const EGLint) -> EGLSurface;
type EglMakeCurrent =
    unsafe extern "C" fn(EGLDisplay, EGLSurface, EGLSurface, EGLContext) -> EGLBoolean;
type EglSwapBuffers = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
type EglDestroySurface = unsafe extern "C" fn(EGLDisplay, EGLSurface) -> EGLBoolean;
type EglDestroyContext = unsafe extern "C" fn(EGLDisplay, EGLContext) -> EGLBoolean;
type EglTerminate = unsafe extern "C" fn(EGLDisplay) -> EGLBoolean;
type EglGetError = unsafe extern "C" fn() -> EGLint;
type EglGetProcAddress = unsafe extern "C" fn(*const c_char) -> *mut c_void;
type EglCreateImageKhr = unsafe extern "C" fn(
    EGLDisplay,
    EGLContext,
    EGLenum,
    *mut c_void,
    *const EGLint,
) -> EGLImageKHR;
type EglDestroyImageKhr = unsafe extern "C" fn(EGLDisplay, EGLImageKHR) -> EGLBoolean;
type GlEglImageTargetTexture2DOes = unsafe extern "C" fn(u32, *mut c_void);

/// ### English
/// Loaded EGL API: core symbols from `libEGL`, extension entry points from
/// `eglGetProcAddress`.
///
/// ### 中文
/// 已加载的 EGL API：核心符号来自 `libEGL`，扩展入口点来自
/// `eglGetProcAddress`。
pub(crate) struct EglApi {
    egl_get_display: EglGetDisplay,
    egl_initialize: EglInitialize,
    egl_choose_config: EglChooseConfig,
    egl_create_context: EglCreateContext,
    egl_create_pbuffer_surface: EglCreatePbufferSurface,
    egl_make_current: EglMakeCurrent,
    egl_swap_buffers: EglSwapBuffers,
    egl_destroy_surface: EglDestroySurface,
    egl_destroy_context: EglDestroyContext,
    egl_terminate: EglTerminate,
    egl_get_error: EglGetError,
    egl_get_proc_address: EglGetProcAddress,
    egl_create_image_khr: EglCreateImageKhr,
    egl_destroy_image_khr: EglDestroyImageKhr,
    gl_egl_image_target_texture_2d_oes: GlEglImageTargetTexture2DOes,
}

unsafe fn sym(lib: *mut c_void, name: &CStr) -> Result<*mut c_void, String> {
    let ptr = unsafe { libc::dlsym(lib, name.as_ptr()) };
    if ptr.is_null() {
        return Err(format!("libEGL is missing symbol {name:?}"));
    }
    Ok(ptr)
}

impl EglApi {
    pub(crate) fn load() -> Result<Self, String> {
        let mut lib = unsafe { libc::dlopen(c"libEGL.so.1".as_ptr(), libc::RTLD_NOW) };
        if lib.is_null() {
            lib = unsafe { libc::dlopen(c"libEGL.so".as_ptr(), libc::RTLD_NOW) };
        }
        if lib.is_null() {
            return Err("libEGL could not be loaded".to_string());
        }

        let api = unsafe {
            let egl_get_proc_address = std::mem::transmute::<*mut c_void, EglGetProcAddress>(sym(
                lib,
                c"eglGetProcAddress",
            )?);
            let ext = |name: &CStr| -> Result<*mut c_void, String> {
                let ptr = egl_get_proc_address(name.as_ptr());
                if ptr.is_null() {
                    return Err(format!("eglGetProcAddress could not resolve {name:?}"));
                }
                Ok(ptr)
            };

            Self {
                egl_get_display: std::mem::transmute::<*mut c_void, EglGetDisplay>(sym(
                    lib,
                    c"eglGetDisplay",
                )?),
                egl_initialize: std::mem::transmute::<*mut c_void, EglInitialize>(sym(
                    lib,
                    c"eglInitialize",
                )?),
                egl_choose_config: std::mem::transmute::<*mut c_void, EglChooseConfig>(sym(
                    lib,
                    c"eglChooseConfig",
                )?),
                egl_create_context: std::mem::transmute::<*mut c_void, EglCreateContext>(sym(
                    lib,
                    c"eglCreateContext",
                )?),
                egl_create_pbuffer_surface: std::mem::transmute::<*mut c_void, EglCreatePbufferSurface>(
                    sym(lib, c"eglCreatePbufferSurface")?,
                ),
                egl_make_current: std::mem::transmute::<*mut c_void, EglMakeCurrent>(sym(
                    lib,
                    c"eglMakeCurrent",
                )?),
                egl_swap_buffers: std::mem::transmute::<*mut c_void, EglSwapBuffers>(sym(
                    lib,
                    c"eglSwapBuffers",
                )?),
                egl_destroy_surface: std::mem::transmute::<*mut c_void, EglDestroySurface>(sym(
                    lib,
                    c"eglDestroySurface",
                )?),
                egl_destroy_context: std::mem::transmute::<*mut c_void, EglDestroyContext>(sym(
                    lib,
                    c"eglDestroyContext",
                )?),
                egl_terminate: std::mem::transmute::<*mut c_void, EglTerminate>(sym(
                    lib,
                    c"eglTerminate",
                )?),
                egl_get_error: std::mem::transmute::<*mut c_void, EglGetError>(sym(
                    lib,
                    c"eglGetError",
                )?),
                egl_create_image_khr: std::mem::transmute::<*mut c_void, EglCreateImageKhr>(ext(
                    c"eglCreateImageKHR",
                )?),
                egl_destroy_image_khr: std::mem::transmute::<*mut c_void, EglDestroyImageKhr>(ext(
                    c"eglDestroyImageKHR",
                )?),
                gl_egl_image_target_texture_2d_oes: std::mem::transmute::<
                    *mut c_void,
                    GlEglImageTargetTexture2DOes,
                >(ext(c"glEGLImageTargetTexture2DOES")?),
                egl_get_proc_address,
            }
        };
        Ok(api)
    }

    fn error_code(&self) -> EGLint {
        unsafe { (self.egl_get_error)() }
    }
}

// EGL function pointers are process-global and thread-safe per the EGL spec.
unsafe impl Send for EglApi {}
unsafe impl Sync for EglApi {}

/// ### English
/// Owned EGLImage; destroyed with `eglDestroyImageKHR` on drop. This is the
/// piece that lets the mailbox and slot pair retire frames by dropping them.
///
/// ### 中文
/// 自有的 EGLImage；drop 时用 `eglDestroyImageKHR` 销毁。邮箱与槽位对
/// 之所以能通过 drop 淘汰帧，靠的就是它。
pub(crate) struct EglImageHandle {
    api: Arc<EglApi>,
    display: EGLDisplay,
    image: EGLImageKHR,
}

// EGLImages are display-level objects, shareable across threads.
unsafe impl Send for EglImageHandle {}
unsafe impl Sync for EglImageHandle {}

impl EglImageHandle {
    fn raw(&self) -> EGLImageKHR {
        self.image
    }
}

impl Drop for EglImageHandle {
    fn drop(&mut self) {
        unsafe {
            (self.api.egl_destroy_image_khr)(self.display, self.image);
        }
    }
}

/// ### English
/// dma-buf importer. Imports with `EGL_NO_CONTEXT`, so it is freely shareable
/// with producer threads; the descriptor fd is closed right after a successful
/// import because EGL holds its own reference to the buffer.
///
/// ### 中文
/// dma-buf 导入器。以 `EGL_NO_CONTEXT` 导入，因此可以随意分享给生产者
/// 线程；导入成功后立即关闭描述符 fd，因为 EGL 持有对缓冲的自有引用。
pub struct EglImporter {
    api: Arc<EglApi>,
    display: EGLDisplay,
}

unsafe impl Send for EglImporter {}
unsafe impl Sync for EglImporter {}

impl DescriptorImporter for EglImporter {
    fn import(&self, descriptor: ExportDescriptor) -> Result<ImportedImage, ImportError> {
        let (fd, layout) = descriptor.into_parts();

        let attribs: [EGLint; 13] = [
            EGL_WIDTH,
            layout.size.width as EGLint,
            EGL_HEIGHT,
            layout.size.height as EGLint,
            EGL_LINUX_DRM_FOURCC_EXT,
            layout.format.drm_fourcc() as EGLint,
            EGL_DMA_BUF_PLANE0_FD_EXT,
            fd.as_raw_fd(),
            EGL_DMA_BUF_PLANE0_OFFSET_EXT,
            0,
            EGL_DMA_BUF_PLANE0_PITCH_EXT,
            layout.pitch as EGLint,
            EGL_NONE,
        ];

        let image = unsafe {
            (self.api.egl_create_image_khr)(
                self.display,
                EGL_NO_CONTEXT,
                EGL_LINUX_DMA_BUF_EXT,
                std::ptr::null_mut(),
                attribs.as_ptr(),
            )
        };
        if image == EGL_NO_IMAGE_KHR {
            return Err(ImportError::Rejected(format!(
                "eglCreateImageKHR failed: EGL error {:#06x}",
                self.api.error_code()
            )));
        }
        // EGL now references the dma-buf; dropping fd here is the zero-copy
        // handoff completing.
        drop(fd);

        Ok(ImportedImage::new(
            layout,
            ImageBacking::Egl(EglImageHandle {
                api: self.api.clone(),
                display: self.display,
                image,
            }),
        ))
    }
}

const VERTEX_SHADER: &str = r#"
attribute vec2 a_position;
attribute vec2 a_texcoord;
varying vec2 v_texcoord;
void main() {
    gl_Position = vec4(a_position, 0.0, 1.0);
    v_texcoord = a_texcoord;
}
"#;

const FRAGMENT_SHADER: &str = r#"
precision mediump float;
varying vec2 v_texcoord;
uniform sampler2D s_texture;
void main() {
    gl_FragColor = texture2D(s_texture, v_texcoord);
}
"#;

// x, y, u, v per vertex; v flipped so row 0 lands at the top.
const QUAD_VERTICES: [f32; 16] = [
    -1.0, -1.0, 0.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    1.0, 1.0, 1.0, 0.0, //
    -1.0, 1.0, 0.0, 0.0, //
];
const QUAD_INDICES: [u16; 6] = [0, 1, 2, 0, 2, 3];

/// ### English
/// Offscreen GLES2 render context over a pbuffer surface.
///
/// ### 中文
/// 基于 pbuffer 表面的离屏 GLES2 渲染上下文。
pub struct EglContext {
    api: Arc<EglApi>,
    display: EGLDisplay,
    context: EGLContext,
    surface: EGLSurface,
    gl: glow::Context,
    program: glow::NativeProgram,
    vbo: glow::NativeBuffer,
    ebo: glow::NativeBuffer,
    importer: Arc<EglImporter>,
}

impl EglContext {
    /// ### English
    /// Initializes EGL on the default display, creates a pbuffer-backed ES2
    /// context, and compiles the textured-quad program.
    ///
    /// ### 中文
    /// 在默认 display 上初始化 EGL，创建以 pbuffer 为后备的 ES2 上下文，
    /// 并编译贴图四边形程序。
    pub fn new(size: PhysicalSize<u32>) -> Result<Self, DeviceContextError> {
        let api = Arc::new(
            EglApi::load().map_err(DeviceContextError::Unavailable)?,
        );

        let display = unsafe { (api.egl_get_display)(std::ptr::null_mut()) };
        if display == EGL_NO_DISPLAY {
            return Err(DeviceContextError::Unavailable(
                "eglGetDisplay returned no display".to_string(),
            ));
        }
        if unsafe { (api.egl_initialize)(display, std::ptr::null_mut(), std::ptr::null_mut()) }
            == EGL_FALSE
        {
            return Err(egl_unavailable(&api, "eglInitialize"));
        }

        let config_attribs: [EGLint; 13] = [
            EGL_SURFACE_TYPE,
            EGL_PBUFFER_BIT,
            EGL_RENDERABLE_TYPE,
            EGL_OPENGL_ES2_BIT,
            EGL_RED_SIZE,
            8,
            EGL_GREEN_SIZE,
            8,
            EGL_BLUE_SIZE,
            8,
            EGL_ALPHA_SIZE,
            8,
            EGL_NONE,
        ];
        let mut config: EGLConfig = std::ptr::null_mut();
        let mut config_count: EGLint = 0;
        let chose = unsafe {
            (api.egl_choose_config)(display, config_attribs.as_ptr(), &mut config, 1, &mut config_count)
        };
        if chose == EGL_FALSE || config_count == 0 {
            return Err(egl_unavailable(&api, "eglChooseConfig"));
        }

        let context_attribs: [EGLint; 3] = [EGL_CONTEXT_CLIENT_VERSION, 2, EGL_NONE];
        let context = unsafe {
            (api.egl_create_context)(display, config, EGL_NO_CONTEXT, context_attribs.as_ptr())
        };
        if context == EGL_NO_CONTEXT {
            return Err(egl_unavailable(&api, "eglCreateContext"));
        }

        let surface_attribs: [EGLint; 5] = [
            EGL_WIDTH,
            size.width as EGLint,
            EGL_HEIGHT,
            size.height as EGLint,
            EGL_NONE,
        ];
        let surface = unsafe {
            (api.egl_create_pbuffer_surface)(display, config, surface_attribs.as_ptr())
        };
        if surface == EGL_NO_SURFACE {
            return Err(egl_unavailable(&api, "eglCreatePbufferSurface"));
        }

        if unsafe { (api.egl_make_current)(display, surface, surface, context) } == EGL_FALSE {
            return Err(egl_unavailable(&api, "eglMakeCurrent"));
        }

        let gl = unsafe {
            glow::Context::from_loader_function(|name| {
                let name = CString::new(name).unwrap();
                (api.egl_get_proc_address)(name.as_ptr()).cast_const()
            })
        };

        let (program, vbo, ebo) = build_quad_pipeline(&gl, size)
            .map_err(DeviceContextError::Unavailable)?;

        let importer = Arc::new(EglImporter {
            api: api.clone(),
            display,
        });

        Ok(Self {
            api,
            display,
            context,
            surface,
            gl,
            program,
            vbo,
            ebo,
            importer,
        })
    }
}

fn egl_unavailable(api: &EglApi, call: &str) -> DeviceContextError {
    DeviceContextError::Unavailable(format!(
        "{call} failed: EGL error {:#06x}",
        api.error_code()
    ))
}

/// ### English
/// Compiles the shaders, links the program, and uploads the fullscreen quad.
/// The attribute layout stays bound for the context's lifetime.
///
/// ### 中文
/// 编译着色器、链接程序并上传全屏四边形。属性布局在上下文生命周期内
/// 保持绑定。
fn build_quad_pipeline(
    gl: &glow::Context,
    size: PhysicalSize<u32>,
) -> Result<(glow::NativeProgram, glow::NativeBuffer, glow::NativeBuffer), String> {
    unsafe {
        let compile = |kind: u32, source: &str| -> Result<glow::NativeShader, String> {
            let shader = gl.create_shader(kind)?;
            gl.shader_source(shader, source);
            gl.compile_shader(shader);
            if !gl.get_shader_compile_status(shader) {
                return Err(format!(
                    "shader compilation failed: {}",
                    gl.get_shader_info_log(shader)
                ));
            }
            Ok(shader)
        };

        let vertex = compile(glow::VERTEX_SHADER, VERTEX_SHADER)?;
        let fragment = compile(glow::FRAGMENT_SHADER, FRAGMENT_SHADER)?;

        let program = gl.create_program()?;
        gl.attach_shader(program, vertex);
        gl.attach_shader(program, fragment);
        gl.link_program(program);
        if !gl.get_program_link_status(program) {
            return Err(format!(
                "program link failed: {}",
                gl.get_program_info_log(program)
            ));
        }
        gl.delete_shader(vertex);
        gl.delete_shader(fragment);
        gl.use_program(Some(program));

        let vbo = gl.create_buffer()?;
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&QUAD_VERTICES),
            glow::STATIC_DRAW,
        );

        let ebo = gl.create_buffer()?;
        gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(ebo));
        gl.buffer_data_u8_slice(
            glow::ELEMENT_ARRAY_BUFFER,
            bytemuck::cast_slice(&QUAD_INDICES),
            glow::STATIC_DRAW,
        );

        let stride = 4 * std::mem::size_of::<f32>() as i32;
        let a_position = gl
            .get_attrib_location(program, "a_position")
            .ok_or("a_position attribute missing")?;
        gl.vertex_attrib_pointer_f32(a_position, 2, glow::FLOAT, false, stride, 0);
        gl.enable_vertex_attrib_array(a_position);
        let a_texcoord = gl
            .get_attrib_location(program, "a_texcoord")
            .ok_or("a_texcoord attribute missing")?;
        gl.vertex_attrib_pointer_f32(a_texcoord, 2, glow::FLOAT, false, stride, 8);
        gl.enable_vertex_attrib_array(a_texcoord);

        let s_texture = gl
            .get_uniform_location(program, "s_texture")
            .ok_or("s_texture uniform missing")?;
        gl.uniform_1_i32(Some(&s_texture), 0);
        gl.active_texture(glow::TEXTURE0);

        gl.viewport(0, 0, size.width as i32, size.height as i32);
        gl.clear_color(0.2, 0.2, 0.2, 1.0);

        Ok((program, vbo, ebo))
    }
}

impl GpuContext for EglContext {
    fn importer(&self) -> Arc<dyn DescriptorImporter> {
        self.importer.clone()
    }

    fn create_slot(&mut self) -> Result<TextureSlot, DeviceContextError> {
        let texture = unsafe {
            self.gl
                .create_texture()
                .map_err(DeviceContextError::Unavailable)?
        };
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MIN_FILTER,
                glow::LINEAR as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_MAG_FILTER,
                glow::LINEAR as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            self.gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );
        }
        Ok(TextureSlot::new(texture.0.get()))
    }

    fn bind_slot(
        &mut self,
        slot: &mut TextureSlot,
        image: ImportedImage,
    ) -> Result<Option<ImportedImage>, BindError> {
        let ImageBacking::Egl(handle) = image.backing() else {
            return Err(BindError::ImageDestroyed);
        };
        let raw_image = handle.raw();

        // Slot names come from create_texture and are never zero.
        let texture = glow::NativeTexture(NonZeroU32::new(slot.name()).unwrap());
        unsafe {
            self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            (self.api.gl_egl_image_target_texture_2d_oes)(GL_TEXTURE_2D, raw_image);
        }
        Ok(slot.replace(image))
    }

    fn draw(&mut self, slot: &TextureSlot) -> Result<(), DeviceContextError> {
        let texture = glow::NativeTexture(NonZeroU32::new(slot.name()).unwrap());
        unsafe {
            self.gl.clear(glow::COLOR_BUFFER_BIT);
            if slot.bound().is_some() {
                self.gl.use_program(Some(self.program));
                self.gl.bind_texture(glow::TEXTURE_2D, Some(texture));
                self.gl
                    .draw_elements(glow::TRIANGLES, 6, glow::UNSIGNED_SHORT, 0);
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceContextError> {
        if unsafe { (self.api.egl_swap_buffers)(self.display, self.surface) } == EGL_FALSE {
            return Err(DeviceContextError::Present(format!(
                "eglSwapBuffers failed: EGL error {:#06x}",
                self.api.error_code()
            )));
        }
        Ok(())
    }

    fn read_back(&mut self) -> Option<Vec<u8>> {
        None
    }
}

impl Drop for EglContext {
    fn drop(&mut self) {
        unsafe {
            self.gl.delete_buffer(self.ebo);
            self.gl.delete_buffer(self.vbo);
            self.gl.delete_program(self.program);
            (self.api.egl_make_current)(
                self.display,
                EGL_NO_SURFACE,
                EGL_NO_SURFACE,
                EGL_NO_CONTEXT,
            );
            (self.api.egl_destroy_surface)(self.display, self.surface);
            (self.api.egl_destroy_context)(self.display, self.context);
            (self.api.egl_terminate)(self.display);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dma_buf_attrib_constants_match_the_extension() {
        // Values fixed by EGL_EXT_image_dma_buf_import.
        assert_eq!(EGL_LINUX_DMA_BUF_EXT, 0x3270);
        assert_eq!(EGL_LINUX_DRM_FOURCC_EXT, 0x3271);
        assert_eq!(EGL_DMA_BUF_PLANE0_FD_EXT, 0x3272);
        assert_eq!(EGL_DMA_BUF_PLANE0_OFFSET_EXT, 0x3273);
        assert_eq!(EGL_DMA_BUF_PLANE0_PITCH_EXT, 0x3274);
    }
}

/// Galaxy3D GPU Engine - owner of the GPU resource layer for one device
///
/// An `Engine` owns the graphics device, the shared uniform buffer and the
/// material caches. Nothing is global except the logger: every cache lives
/// and dies with the engine that created it.

use std::sync::{OnceLock, RwLock};
use std::time::SystemTime;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::graphics_device::{GraphicsDevice, ProgramHandle};
use crate::log::{Logger, LogEntry, LogSeverity, DefaultLogger};
use crate::material::{DefinitionCache, DefinitionKey, MaterialDefinition, ProgramCache, ProgramSpecialization};
use crate::uniform::{UniformBufferManager, UniformClient};
use crate::utils::{AllocationId, Constructed};

const SOURCE: &str = "galaxy3d::Engine";

// ===== INTERNAL STATE =====

/// Global logger (initialized with DefaultLogger)
static LOGGER: OnceLock<RwLock<Box<dyn Logger>>> = OnceLock::new();

fn logger() -> &'static RwLock<Box<dyn Logger>> {
    LOGGER.get_or_init(|| RwLock::new(Box::new(DefaultLogger::default())))
}

// ===== PUBLIC API =====

/// GPU resource session
///
/// # Example
///
/// ```no_run
/// use galaxy_3d_gpu::galaxy3d::{Engine, Config};
/// use galaxy_3d_gpu::galaxy3d::uniform::UniformBlock;
/// # fn device() -> Box<dyn galaxy_3d_gpu::galaxy3d::device::GraphicsDevice> { unimplemented!() }
///
/// let mut engine = Engine::from_boxed(device(), Config::default())?;
/// let mut blocks = vec![UniformBlock::new(64)];
///
/// engine.prepare_frame(&mut blocks)?;
/// // ... record and submit the frame ...
/// engine.end_frame(&blocks)?;
///
/// engine.shutdown();
/// # Ok::<(), galaxy_3d_gpu::galaxy3d::Error>(())
/// ```
pub struct Engine {
    graphics_device: Box<dyn GraphicsDevice>,
    /// `None` once shut down
    uniforms: Option<UniformBufferManager>,
    definitions: DefinitionCache,
    programs: ProgramCache,
}

impl Engine {
    /// Helper to log errors before returning them (internal use)
    fn log_and_return_error(error: Error) -> Error {
        match &error {
            Error::InitializationFailed(msg) => {
                crate::engine_error!(SOURCE, "Initialization failed: {}", msg);
            }
            Error::BackendError(msg) => {
                crate::engine_error!(SOURCE, "Backend error: {}", msg);
            }
            _ => {
                crate::engine_error!(SOURCE, "Engine error: {}", error);
            }
        }
        error
    }

    /// Create an engine over `device`
    ///
    /// # Errors
    ///
    /// Invalid configuration, or the device failing to create the first
    /// uniform buffer.
    pub fn new<D: GraphicsDevice + 'static>(device: D, config: Config) -> Result<Self> {
        Self::from_boxed(Box::new(device), config)
    }

    /// Create an engine over an already boxed device
    pub fn from_boxed(mut graphics_device: Box<dyn GraphicsDevice>, config: Config) -> Result<Self> {
        let uniforms = UniformBufferManager::new(graphics_device.as_mut(), config.uniform_buffer)
            .map_err(Self::log_and_return_error)?;
        crate::engine_info!(SOURCE, "Engine created ({} byte uniform buffer)", uniforms.total_size());

        Ok(Self {
            graphics_device,
            uniforms: Some(uniforms),
            definitions: DefinitionCache::new(),
            programs: ProgramCache::new(),
        })
    }

    /// Graphics device driven by this engine
    pub fn graphics_device(&mut self) -> &mut dyn GraphicsDevice {
        self.graphics_device.as_mut()
    }

    /// Shared uniform buffer
    ///
    /// # Panics
    ///
    /// After `shutdown`.
    pub fn uniforms(&self) -> &UniformBufferManager {
        self.uniforms.as_ref()
            .unwrap_or_else(|| panic!("engine used after shutdown"))
    }

    pub fn definitions(&self) -> &DefinitionCache {
        &self.definitions
    }

    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    pub fn is_shut_down(&self) -> bool {
        self.uniforms.is_none()
    }

    // ===== FRAME =====

    /// Reclaim, allocate, map the uniform buffer and upload dirty clients,
    /// then unmap
    ///
    /// Returns the number of clients written.
    pub fn prepare_frame<C: UniformClient>(&mut self, clients: &mut [C]) -> Result<usize> {
        self.begin_frame(clients)?;
        let written = live(&mut self.uniforms).write_dirty_clients(self.graphics_device.as_mut(), clients);
        self.finish_begin_frame();
        written.map_err(Self::log_and_return_error)
    }

    /// First half of [`prepare_frame`](Self::prepare_frame): leaves the
    /// uniform buffer mapped for [`write_uniform`](Self::write_uniform)
    pub fn begin_frame<C: UniformClient>(&mut self, clients: &mut [C]) -> Result<()> {
        live(&mut self.uniforms)
            .begin_frame(self.graphics_device.as_mut(), clients)
            .map_err(Self::log_and_return_error)
    }

    /// Write raw bytes to a slot while the uniform buffer is mapped
    pub fn write_uniform(&mut self, id: AllocationId, bytes: &[u8]) -> Result<()> {
        live(&mut self.uniforms).write(self.graphics_device.as_mut(), id, bytes)
    }

    /// Unmap the uniform buffer
    pub fn finish_begin_frame(&mut self) {
        live(&mut self.uniforms).finish_begin_frame(self.graphics_device.as_mut());
    }

    /// Lock the frame's slots behind a new fence, after submission
    pub fn end_frame<C: UniformClient>(&mut self, clients: &[C]) -> Result<()> {
        live(&mut self.uniforms)
            .end_frame(self.graphics_device.as_mut(), clients)
            .map_err(Self::log_and_return_error)
    }

    /// Release the slot of a client being destroyed
    pub fn release_uniform_client<C: UniformClient + ?Sized>(&mut self, client: &mut C) {
        live(&mut self.uniforms).release_client(client);
    }

    // ===== CACHES =====

    /// See [`DefinitionCache::acquire_definition`]
    pub fn acquire_definition<F, R>(&mut self, key: DefinitionKey, parse: F) -> Option<&MaterialDefinition>
    where
        F: FnOnce() -> R,
        R: Constructed<MaterialDefinition>,
    {
        self.definitions.acquire_definition(key, parse)
    }

    /// See [`DefinitionCache::release_definition`]
    pub fn release_definition(&mut self, key: &DefinitionKey) -> bool {
        self.definitions.release_definition(self.graphics_device.as_mut(), key)
    }

    /// See [`ProgramCache::acquire_program`]
    pub fn acquire_program<F, R>(&mut self, key: ProgramSpecialization, compile: F) -> Option<ProgramHandle>
    where
        F: FnOnce() -> R,
        R: Constructed<ProgramHandle>,
    {
        self.programs.acquire_program(key, compile)
    }

    /// See [`ProgramCache::reserve_program`]
    pub fn reserve_program(&mut self, key: ProgramSpecialization) -> ProgramHandle {
        self.programs.reserve_program(key)
    }

    /// See [`ProgramCache::fill_program`]
    pub fn fill_program(&mut self, key: &ProgramSpecialization, program: ProgramHandle) {
        self.programs.fill_program(key, program);
    }

    /// See [`ProgramCache::release_program`]
    pub fn release_program(&mut self, key: &ProgramSpecialization) -> bool {
        self.programs.release_program(self.graphics_device.as_mut(), key)
    }

    // ===== TEARDOWN =====

    /// Destroy every GPU object owned by the engine
    ///
    /// Programs go first (they use definition layouts), then definitions,
    /// then the uniform buffer. The GPU must be idle. Idempotent; also run
    /// on drop.
    pub fn shutdown(&mut self) {
        let Some(uniforms) = self.uniforms.take() else {
            return;
        };
        let device = self.graphics_device.as_mut();
        self.programs.terminate(device);
        self.definitions.terminate(device);
        uniforms.terminate(device);
        crate::engine_info!(SOURCE, "Engine shut down");
    }

    // ===== LOGGING =====

    /// Set a custom logger
    ///
    /// Replaces the current logger (DefaultLogger by default).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use galaxy_3d_gpu::galaxy3d::Engine;
    /// use galaxy_3d_gpu::galaxy3d::log::{Logger, LogEntry};
    ///
    /// struct FileLogger;
    ///
    /// impl Logger for FileLogger {
    ///     fn log(&self, entry: &LogEntry) {
    ///         // Write to file...
    ///     }
    /// }
    ///
    /// Engine::set_logger(FileLogger);
    /// ```
    pub fn set_logger<L: Logger + 'static>(logger_impl: L) {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(logger_impl);
        }
    }

    /// Reset logger to default (DefaultLogger)
    pub fn reset_logger() {
        if let Ok(mut lock) = logger().write() {
            *lock = Box::new(DefaultLogger::default());
        }
    }

    /// Internal logging method (for simple logs without file:line)
    ///
    /// Used by macros like engine_info!, engine_warn!, etc.
    ///
    /// # Arguments
    ///
    /// * `severity` - Log severity level
    /// * `source` - Source module (e.g., "galaxy3d::Engine")
    /// * `message` - Log message
    pub fn log(severity: LogSeverity, source: &str, message: String) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: None,
                line: None,
            });
        }
    }

    /// Internal logging method with file:line information (for ERROR logs)
    ///
    /// Used by engine_error! and engine_err! to include source location.
    pub fn log_detailed(
        severity: LogSeverity,
        source: &str,
        message: String,
        file: &'static str,
        line: u32,
    ) {
        if let Ok(lock) = logger().read() {
            lock.log(&LogEntry {
                severity,
                timestamp: SystemTime::now(),
                source: source.to_string(),
                message,
                file: Some(file),
                line: Some(line),
            });
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn live(uniforms: &mut Option<UniformBufferManager>) -> &mut UniformBufferManager {
    uniforms.as_mut()
        .unwrap_or_else(|| panic!("engine used after shutdown"))
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;

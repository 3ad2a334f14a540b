use std::collections::{HashMap, HashSet};
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Mutex};

use itertools::Itertools;
use lazy_static::lazy_static;

use crate::args::{KernelArgs, KernelContext, KernelError};
use crate::handle::Device;
use crate::kernels::builtin_module;

/// The entry point of an emulated kernel.
pub type KernelFn = fn(&KernelContext) -> Result<(), KernelError>;

lazy_static! {
    static ref MODULE_SOURCES: Mutex<HashMap<String, ModuleSource>> = {
        let builtin = builtin_module();
        let mut map = HashMap::new();
        map.insert(builtin.name().to_owned(), builtin);
        Mutex::new(map)
    };
    static ref MODULE_CACHE: Mutex<HashMap<(Device, String), KernelModule>> = Mutex::new(HashMap::new());
}

/// The uncompiled form of a module: a name and a list of named entry points.
#[derive(Clone)]
pub struct ModuleSource {
    name: String,
    functions: Vec<(String, KernelFn)>,
}

/// A compiled module, bound to a single device.
///
/// Modules and functions are reference counted, cloning is cheap.
#[derive(Clone)]
pub struct KernelModule {
    inner: Arc<ModuleInner>,
}

struct ModuleInner {
    device: Device,
    name: String,
    functions: HashMap<String, KernelFn>,
}

#[derive(Clone)]
pub struct KernelFunction {
    // keeps the module alive for as long as any of its functions are
    module: Arc<ModuleInner>,
    name: Arc<str>,
    func: KernelFn,
}

#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ModuleError {
    #[error("kernel module `{0}` not found, registered modules: {1:?}")]
    NotFound(String, Vec<String>),
    #[error("kernel module `{0}` does not contain any functions")]
    Empty(String),
    #[error("kernel module `{module}` defines function `{function}` more than once")]
    DuplicateFunction { module: String, function: String },
    #[error("kernel module `{module}` has a function with invalid name `{function}`")]
    InvalidFunctionName { module: String, function: String },
}

impl ModuleSource {
    pub fn new(name: impl Into<String>) -> Self {
        ModuleSource {
            name: name.into(),
            functions: vec![],
        }
    }

    pub fn with_function(mut self, name: impl Into<String>, func: KernelFn) -> Self {
        self.add_function(name, func);
        self
    }

    pub fn add_function(&mut self, name: impl Into<String>, func: KernelFn) {
        self.functions.push((name.into(), func));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.functions.iter().map(|(name, _)| name.as_str())
    }
}

/// Register a module source so it can later be found by [KernelModule::load].
/// Returns the previously registered source with the same name, if any.
pub fn register_module(source: ModuleSource) -> Option<ModuleSource> {
    let name = source.name().to_owned();
    let prev = MODULE_SOURCES.lock().unwrap().insert(name.clone(), source);

    // drop stale compiled versions
    MODULE_CACHE.lock().unwrap().retain(|(_, cached), _| cached != &name);

    prev
}

pub fn registered_module_names() -> Vec<String> {
    MODULE_SOURCES.lock().unwrap().keys().cloned().sorted().collect()
}

impl KernelModule {
    /// Locate the registered module `name` and compile it for `device`.
    /// Compiled modules are cached per device, so repeated loads are cheap and share functions.
    pub fn load(device: Device, name: &str) -> Result<KernelModule, ModuleError> {
        // keep locked for the duration of compilation
        let mut cache = MODULE_CACHE.lock().unwrap();
        let key = (device, name.to_owned());

        if let Some(module) = cache.get(&key) {
            return Ok(module.clone());
        }

        let source = MODULE_SOURCES.lock().unwrap().get(name).cloned();
        let source = source.ok_or_else(|| ModuleError::NotFound(name.to_owned(), registered_module_names()))?;

        let module = KernelModule::compile(device, &source)?;
        log::debug!(
            "Compiled kernel module `{}` for {:?} with functions {:?}",
            name,
            device,
            module.function_names()
        );

        cache.insert(key, module.clone());
        Ok(module)
    }

    /// Compile `source` for `device` without going through the registry or the cache.
    pub fn compile(device: Device, source: &ModuleSource) -> Result<KernelModule, ModuleError> {
        if source.functions.is_empty() {
            return Err(ModuleError::Empty(source.name.clone()));
        }

        let mut seen = HashSet::new();
        for (name, _) in &source.functions {
            if !is_valid_identifier(name) {
                return Err(ModuleError::InvalidFunctionName {
                    module: source.name.clone(),
                    function: name.clone(),
                });
            }
            if !seen.insert(name.as_str()) {
                return Err(ModuleError::DuplicateFunction {
                    module: source.name.clone(),
                    function: name.clone(),
                });
            }
        }

        let inner = ModuleInner {
            device,
            name: source.name.clone(),
            functions: source.functions.iter().cloned().collect(),
        };
        Ok(KernelModule { inner: Arc::new(inner) })
    }

    pub fn function(&self, name: &str) -> Option<KernelFunction> {
        let (name, &func) = self.inner.functions.get_key_value(name)?;
        Some(KernelFunction {
            module: Arc::clone(&self.inner),
            name: Arc::from(name.as_str()),
            func,
        })
    }

    pub fn function_names(&self) -> Vec<&str> {
        self.inner.functions.keys().map(|s| s.as_str()).sorted().collect()
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn device(&self) -> Device {
        self.inner.device
    }
}

impl KernelFunction {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module_name(&self) -> &str {
        &self.module.name
    }

    pub fn device(&self) -> Device {
        self.module.device
    }

    /// Run the kernel synchronously on the calling thread.
    /// This is what the queue thread does for each dispatch, it's exposed for testing kernels in isolation.
    pub fn launch(&self, args: &KernelArgs) -> Result<(), KernelError> {
        (self.func)(&KernelContext::new(&self.name, args))
    }
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => chars.all(|c| c.is_ascii_alphanumeric() || c == '_'),
        _ => false,
    }
}

impl Debug for ModuleSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSource")
            .field("name", &self.name)
            .field("functions", &self.function_names().collect_vec())
            .finish()
    }
}

impl Debug for KernelModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelModule")
            .field("device", &self.inner.device)
            .field("name", &self.inner.name)
            .field("functions", &self.function_names())
            .finish()
    }
}

impl Debug for KernelFunction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "KernelFunction({}::{})", self.module.name, self.name)
    }
}

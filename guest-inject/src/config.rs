// Engine configuration
//
// Every remote name the engine depends on lives here so a different guest
// runtime or accessor build can be targeted without code changes. All fields
// default; a JSON file only needs to carry what differs.

use crate::error::{InjectError, InjectResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub naming: NamingConfig,
    pub runtime: RuntimeConfig,
    pub accessor: AccessorConfig,
    pub timing: TimingConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> InjectResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| InjectError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> InjectResult<Self> {
        serde_json::from_str(text).map_err(|e| InjectError::Config(e.to_string()))
    }
}

/// How artifacts in the bundle are recognized
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingConfig {
    pub accessor_suffix: String,
    pub nested_marker: char,
    pub bootstrap_loader_suffix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            accessor_suffix: "Accessor".to_string(),
            nested_marker: '$',
            bootstrap_loader_suffix: "DebugClassLoader".to_string(),
        }
    }
}

impl NamingConfig {
    /// Simple name of a binary class name ("a.b.C$D" -> "C$D")
    pub fn simple_name<'a>(&self, class_name: &'a str) -> &'a str {
        class_name.rsplit('.').next().unwrap_or(class_name)
    }

    pub fn is_accessor(&self, class_name: &str) -> bool {
        let simple = self.simple_name(class_name);
        !simple.contains(self.nested_marker) && simple.ends_with(&self.accessor_suffix)
    }

    pub fn is_bootstrap_loader(&self, class_name: &str) -> bool {
        let simple = self.simple_name(class_name);
        !simple.contains(self.nested_marker) && simple.ends_with(&self.bootstrap_loader_suffix)
    }
}

/// A method addressed by declaring type and name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodTarget {
    pub class_name: String,
    pub method: String,
}

impl MethodTarget {
    pub fn new(class_name: &str, method: &str) -> Self {
        Self {
            class_name: class_name.to_string(),
            method: method.to_string(),
        }
    }
}

/// A method addressed by name and JVM signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    pub signature: String,
}

impl MethodSpec {
    pub fn new(name: &str, signature: &str) -> Self {
        Self {
            name: name.to_string(),
            signature: signature.to_string(),
        }
    }
}

/// Guest runtime types observed in the target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Entry point whose return value is a freshly built runtime
    pub builder: MethodTarget,
    pub runtime_type: String,
    /// First guest-capable code to run; used to bootstrap the accessor early
    pub service_trigger: MethodTarget,
    /// Always-hit guest method used to reach runtimes created before attach
    pub existing_probe: MethodTarget,
    /// Types whose loader can define the bundle, in priority order
    pub loader_markers: Vec<String>,
    /// Packages of the first marker's module opened to the bundle's loader
    pub exported_packages: Vec<String>,
    pub module_isolation_since: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            builder: MethodTarget::new("org.graalvm.polyglot.Engine$Builder", "build"),
            runtime_type: "org.graalvm.polyglot.Engine".to_string(),
            service_trigger: MethodTarget::new("org.graalvm.polyglot.Context", "eval"),
            existing_probe: MethodTarget::new(
                "com.oracle.truffle.polyglot.PolyglotContextImpl",
                "enterThreadChanged",
            ),
            loader_markers: vec![
                "com.oracle.truffle.api.TruffleLanguage".to_string(),
                "org.graalvm.polyglot.Engine".to_string(),
            ],
            exported_packages: [
                "com.oracle.truffle.api",
                "com.oracle.truffle.api.debug",
                "com.oracle.truffle.api.frame",
                "com.oracle.truffle.api.instrumentation",
                "com.oracle.truffle.api.nodes",
                "com.oracle.truffle.api.source",
            ]
            .iter()
            .map(|p| p.to_string())
            .collect(),
            module_isolation_since: 9,
        }
    }
}

/// Members of the uploaded accessor class
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessorConfig {
    pub setup: MethodSpec,
    pub start_access_loop: MethodSpec,
    pub running_field: String,
    pub access_requested_field: String,
    pub access_trigger: String,
    pub include_internal_setter: MethodSpec,
    pub set_breakpoint: MethodSpec,
    pub remove_breakpoint: MethodSpec,
    pub bootstrap_loader_constructor: String,
}

impl Default for AccessorConfig {
    fn default() -> Self {
        Self {
            setup: MethodSpec::new(
                "setUpDebugManagerFor",
                "(Ljava/lang/Object;ZZ)Ljava/lang/Object;",
            ),
            start_access_loop: MethodSpec::new("startAccessLoop", "()Ljava/lang/Thread;"),
            running_field: "accessLoopRunning".to_string(),
            access_requested_field: "accessRequested".to_string(),
            access_trigger: "debuggerAccess".to_string(),
            include_internal_setter: MethodSpec::new("setIncludeInternal", "(Z)V"),
            set_breakpoint: MethodSpec::new(
                "setLineBreakpoint",
                "(Ljava/lang/Object;Ljava/lang/String;IILjava/lang/String;)Ljava/lang/Object;",
            ),
            remove_breakpoint: MethodSpec::new("removeBreakpoint", "(Ljava/lang/Object;)V"),
            bootstrap_loader_constructor: "(Ljava/lang/ClassLoader;)V".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before a thread suspended only for our calls is resumed
    pub auto_resume_grace_ms: u64,
    /// Upper bound on waiting for the trigger breakpoint; unbounded when unset
    pub trigger_wait_ms: Option<u64>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            auto_resume_grace_ms: 500,
            trigger_wait_ms: None,
        }
    }
}

impl TimingConfig {
    pub fn auto_resume_grace(&self) -> Duration {
        Duration::from_millis(self.auto_resume_grace_ms)
    }

    pub fn trigger_wait(&self) -> Option<Duration> {
        self.trigger_wait_ms.map(Duration::from_millis)
    }
}

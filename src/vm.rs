//! The top-level VM: plan evaluation and function invocation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::builtins::Builtin;
use crate::bytecode::{Executable, FunctionInfo};
use crate::cache::{self, CacheEntry, InterQueryCache, ValueCache};
use crate::compiler::Compiler;
use crate::consts::{DEFAULT_INSTRUCTION_LIMIT, LOCAL_DATA, LOCAL_INPUT};
use crate::context::{
    Metrics, PrintHook, COUNTER_EVAL_CACHE_HIT, COUNTER_EVAL_CACHE_MISS,
    COUNTER_EVAL_INSTRUCTIONS,
};
use crate::error::{BuiltinError, EvalError, VmError};
use crate::interpreter::Evaluator;
use crate::ir;
use crate::pool::PagePool;
use crate::state::{Cancel, Meter};
use crate::value::{from_native, to_native, Value};

static NEXT_VM_ID: AtomicU64 = AtomicU64::new(1);

/// Construction options for [`Vm::new`].
#[derive(Default)]
pub struct VmOptions {
    /// Host builtin implementations, resolved by name at compile time.
    pub builtins: Vec<Arc<dyn Builtin>>,
    /// Capability gate over declared builtin names.
    pub capabilities: Option<Vec<String>>,
}

/// A compiled policy VM.
///
/// The executable and the resolved builtin table are immutable after
/// construction (the string intern cache fills in lazily), so one `Vm`
/// serves any number of concurrent evaluations.
pub struct Vm {
    exe: Executable,
    host_builtins: Vec<Option<Arc<dyn Builtin>>>,
    pool: PagePool,
    id: u64,
}

impl Vm {
    /// Compile `policy` and build a VM over the result.
    pub fn new(policy: &ir::Policy, options: VmOptions) -> Result<Self, VmError> {
        let mut compiler = Compiler::new(policy)
            .with_host_builtins(options.builtins.iter().map(|b| b.name().to_string()));
        if let Some(caps) = &options.capabilities {
            compiler = compiler.with_capabilities(caps.iter().cloned());
        }
        let bytes = compiler.compile()?;
        Ok(Self::from_executable(bytes, options.builtins)?)
    }

    /// Build a VM over an existing executable buffer.
    pub fn from_executable(
        bytes: Vec<u8>,
        builtins: Vec<Arc<dyn Builtin>>,
    ) -> Result<Self, EvalError> {
        let exe = Executable::from_bytes(bytes)?;
        let by_name: HashMap<&str, &Arc<dyn Builtin>> =
            builtins.iter().map(|b| (b.name(), b)).collect();
        let mut host_builtins = Vec::with_capacity(exe.functions().len());
        for entry in exe.functions() {
            match entry {
                FunctionInfo::Builtin(b) if b.specialized.is_none() => {
                    let host = by_name
                        .get(b.name.as_ref())
                        .map(|b| Arc::clone(b))
                        .ok_or(EvalError::InvalidExecutable(
                            "declared builtin has no host implementation",
                        ))?;
                    host_builtins.push(Some(host));
                }
                _ => host_builtins.push(None),
            }
        }
        Ok(Self {
            exe,
            host_builtins,
            pool: PagePool::default(),
            id: NEXT_VM_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// The executable this VM runs.
    pub fn executable(&self) -> &Executable {
        &self.exe
    }

    /// Evaluate the plan named `name` and return the accumulated result
    /// set in native tree form.
    pub fn eval(&self, name: &str, opts: &EvalOptions) -> Result<EvalResult, EvalError> {
        let Some((plan_idx, plan)) = self.exe.plan_by_name(name) else {
            return Err(EvalError::QueryNotFound(name.to_string()));
        };
        let blocks_off = plan.blocks_off;
        tracing::debug!(plan = name, "eval");

        let now = opts.time.unwrap_or_else(SystemTime::now);
        let input = opts.input.as_ref().map(from_native);

        // Inter-query cache probe, keyed by the configured input-field
        // projections.
        let config = cache::current_config();
        let cache_key = match (&opts.inter_query_cache, &input) {
            (Some(_), Some(input)) if config.enabled => {
                Some(cache::build_key(self.id, plan_idx as u32, input, &config))
            }
            _ => None,
        };
        if let (Some(cache), Some(key)) = (&opts.inter_query_cache, &cache_key) {
            if let Some(entry) = cache.get(key) {
                if entry.expires >= now {
                    if let Some(metrics) = &opts.metrics {
                        metrics.add(COUNTER_EVAL_CACHE_HIT, 1);
                    }
                    return Ok(EvalResult {
                        value: entry.value,
                        builtin_errors: Vec::new(),
                        instructions: 0,
                    });
                }
            }
            if let Some(metrics) = &opts.metrics {
                metrics.add(COUNTER_EVAL_CACHE_MISS, 1);
            }
        }

        let mut evaluator = self.evaluator(opts, now);
        let mut locals = evaluator.new_locals();
        if let Some(input) = input {
            locals.set(LOCAL_INPUT, input);
        }
        locals.set(LOCAL_DATA, opts.data.clone().unwrap_or_else(Value::new_object));
        locals.set_data_flag(LOCAL_DATA, true);

        evaluator.eval_plan(&mut locals, blocks_off)?;
        drop(locals);

        let builtin_errors = evaluator.take_errors();
        if opts.strict_builtin_errors {
            if let Some(first) = builtin_errors.first() {
                return Err(EvalError::StrictBuiltin(first.clone()));
            }
        }

        let result_set = evaluator.take_result_set();
        let value = to_native(&Value::Set(result_set));
        let instructions = evaluator.instructions();
        if let Some(metrics) = &opts.metrics {
            metrics.add(COUNTER_EVAL_INSTRUCTIONS, instructions);
        }
        // Only clean results populate the inter-query layer; evaluations
        // that collected builtin errors recompute next time.
        if builtin_errors.is_empty() {
            if let (Some(cache), Some(key)) = (&opts.inter_query_cache, cache_key) {
                cache.insert(
                    key,
                    CacheEntry {
                        value: value.clone(),
                        expires: now + config.ttl,
                    },
                );
            }
        }
        Ok(EvalResult {
            value,
            builtin_errors,
            instructions,
        })
    }

    /// Invoke a function by dotted path. A compiled function named
    /// `g0.data.<path>` is called with `(input, data)`; otherwise the plan
    /// named `<path-with-slashes>` is evaluated and the `"result"` field of
    /// its single result is extracted.
    pub fn function(&self, path: &str, opts: &EvalOptions) -> Result<FunctionResult, EvalError> {
        let name = format!("g0.data.{path}");
        let Some((_, f)) = self.exe.function_by_name(&name) else {
            return self.function_via_plan(path, opts);
        };
        let params = f.params.clone();
        let blocks_off = f.blocks_off;
        tracing::debug!(function = %name, "call");

        let now = opts.time.unwrap_or_else(SystemTime::now);
        let mut evaluator = self.evaluator(opts, now);
        let input = opts.input.as_ref().map(from_native);
        let data = Some(opts.data.clone().unwrap_or_else(Value::new_object));
        let returned =
            evaluator.call_function_direct(&params, blocks_off, vec![input, data], Some(1))?;

        let builtin_errors = evaluator.take_errors();
        if opts.strict_builtin_errors {
            if let Some(first) = builtin_errors.into_iter().next() {
                return Err(EvalError::StrictBuiltin(first));
            }
            return Ok(FunctionResult {
                result: returned.as_ref().map(to_native),
                builtin_errors: Vec::new(),
                instructions: evaluator.instructions(),
            });
        }
        Ok(FunctionResult {
            result: returned.as_ref().map(to_native),
            builtin_errors,
            instructions: evaluator.instructions(),
        })
    }

    fn function_via_plan(
        &self,
        path: &str,
        opts: &EvalOptions,
    ) -> Result<FunctionResult, EvalError> {
        let plan_name = path.replace('.', "/");
        if self.exe.plan_by_name(&plan_name).is_none() {
            return Err(EvalError::FunctionNotFound(path.to_string()));
        }
        let eval = self.eval(&plan_name, opts)?;
        let result = eval
            .value
            .as_array()
            .and_then(|results| results.first())
            .and_then(|first| first.get("result"))
            .cloned();
        Ok(FunctionResult {
            result,
            builtin_errors: eval.builtin_errors,
            instructions: eval.instructions,
        })
    }

    fn evaluator<'vm>(&'vm self, opts: &'vm EvalOptions, now: SystemTime) -> Evaluator<'vm> {
        let cancel = opts.cancel.clone().unwrap_or_default();
        Evaluator::new(
            &self.exe,
            &self.host_builtins,
            self.pool.clone(),
            Meter::new(opts.limits.instructions),
            cancel,
            now,
            opts.seed.map(StdRng::seed_from_u64),
            opts.runtime.as_ref().map(from_native),
            opts.print_hook.as_deref(),
            opts.metrics.as_deref(),
            opts.cache.as_deref(),
            opts.ndb_cache.as_deref(),
        )
    }
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("id", &self.id)
            .field("plans", &self.exe.plans().len())
            .field("functions", &self.exe.functions().len())
            .finish()
    }
}

/// Resource limits for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    /// Statement budget; exceeding it fails the evaluation.
    pub instructions: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTION_LIMIT,
        }
    }
}

/// Option bag for [`Vm::eval`] and [`Vm::function`].
#[derive(Default)]
pub struct EvalOptions {
    /// Input document in native tree form.
    pub input: Option<serde_json::Value>,
    /// Data document; may wrap an external iterable store.
    pub data: Option<Value>,
    /// Cancellation handle shared with the caller.
    pub cancel: Option<Cancel>,
    /// Freezes the clock observed by built-ins and the cache layer.
    pub time: Option<SystemTime>,
    /// Seed for non-deterministic built-ins.
    pub seed: Option<u64>,
    /// Runtime information exposed to policy code.
    pub runtime: Option<serde_json::Value>,
    /// Counter sink.
    pub metrics: Option<Arc<dyn Metrics>>,
    /// Debug print sink.
    pub print_hook: Option<Arc<dyn PrintHook>>,
    /// Fail on the first collected builtin error.
    pub strict_builtin_errors: bool,
    /// Resource limits.
    pub limits: Limits,
    /// Intra-evaluation cache slot.
    pub cache: Option<Arc<ValueCache>>,
    /// Non-deterministic builtin cache slot.
    pub ndb_cache: Option<Arc<ValueCache>>,
    /// Inter-query TTL cache.
    pub inter_query_cache: Option<Arc<dyn InterQueryCache>>,
}

/// Result of a plan evaluation.
#[derive(Debug, Clone)]
pub struct EvalResult {
    /// The accumulated result set in native tree form.
    pub value: serde_json::Value,
    /// Collected builtin errors, empty in strict mode.
    pub builtin_errors: Vec<BuiltinError>,
    /// Statements executed.
    pub instructions: u64,
}

/// Result of a function invocation.
#[derive(Debug, Clone)]
pub struct FunctionResult {
    /// The return value, or `None` when the callee set no return.
    pub result: Option<serde_json::Value>,
    /// Collected builtin errors, empty in strict mode.
    pub builtin_errors: Vec<BuiltinError>,
    /// Statements executed.
    pub instructions: u64,
}

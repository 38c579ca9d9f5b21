//! Sandboxed script engine
//!
//! One QuickJS runtime and context per engine. Globals written by a script
//! persist across evaluations. Every evaluation runs under a wall-clock
//! deadline checked by the runtime's interrupt handler, so even a busy loop
//! is stopped. Calls to exposed actions are counted per evaluation; `skip()`
//! and `use(name, params)` are always bound.

use crate::actions::{ActionIntent, ActionLedger, SKIP};
use crate::normalizer::normalize;
use crate::render::Inspector;
use cogwheel_core::ReplConfig;
use rquickjs::function::Rest;
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Exception, Function, Runtime, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A Rust function callable from scripts. Arguments and the result cross the
/// boundary as JSON; an `Err` is thrown into the script as an `Error`.
pub type HostFunction = Arc<dyn Fn(Vec<serde_json::Value>) -> Result<serde_json::Value, String> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ReplError {
    #[error("script timed out after {elapsed_ms} ms (limit {timeout_ms} ms)")]
    Timeout { timeout_ms: u64, elapsed_ms: u64 },

    #[error("{name}: {message}")]
    Exception {
        name: String,
        message: String,
        stack: Option<String>,
    },

    #[error("engine error: {0}")]
    Engine(String),
}

impl From<rquickjs::Error> for ReplError {
    fn from(e: rquickjs::Error) -> Self {
        ReplError::Engine(e.to_string())
    }
}

const DISARMED: u64 = u64::MAX;

/// Deadline shared with the interrupt handler, in nanoseconds since `epoch`.
struct Deadline {
    epoch: Instant,
    at: AtomicU64,
    tripped: AtomicBool,
}

impl Deadline {
    fn new() -> Self {
        Self { epoch: Instant::now(), at: AtomicU64::new(DISARMED), tripped: AtomicBool::new(false) }
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(DISARMED - 1)
    }

    fn arm(&self, timeout: Duration) {
        let budget = u64::try_from(timeout.as_nanos()).unwrap_or(DISARMED - 1);
        self.tripped.store(false, Ordering::SeqCst);
        self.at.store(self.now().saturating_add(budget).min(DISARMED - 1), Ordering::SeqCst);
    }

    fn disarm(&self) {
        self.at.store(DISARMED, Ordering::SeqCst);
    }

    /// Called by the runtime; `true` aborts the running script.
    fn check(&self) -> bool {
        let at = self.at.load(Ordering::SeqCst);
        if at != DISARMED && self.now() >= at {
            self.tripped.store(true, Ordering::SeqCst);
            return true;
        }
        false
    }

    fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }
}

pub struct ReplEngine {
    runtime: Runtime,
    context: Context,
    deadline: Arc<Deadline>,
    timeout: Duration,
    inspector: Inspector,
    exposed: Vec<String>,
    actions: Arc<ActionLedger>,
    last_actions: Vec<ActionIntent>,
}

impl ReplEngine {
    pub fn new(config: ReplConfig) -> Result<Self, ReplError> {
        let runtime = Runtime::new()?;
        if config.memory_limit_bytes > 0 {
            runtime.set_memory_limit(config.memory_limit_bytes);
        }

        let deadline = Arc::new(Deadline::new());
        let handler_deadline = Arc::clone(&deadline);
        runtime.set_interrupt_handler(Some(Box::new(move || handler_deadline.check())));

        let context = Context::full(&runtime)?;
        let actions = Arc::new(ActionLedger::new(config.max_actions_per_turn));
        context.with(|ctx| bind_builtins(&ctx, &actions))?;
        debug!(
            timeout_ms = config.timeout_ms,
            max_actions = config.max_actions_per_turn,
            "script engine ready"
        );

        Ok(Self {
            runtime,
            context,
            deadline,
            timeout: Duration::from_millis(config.timeout_ms),
            inspector: Inspector::from(&config),
            exposed: vec![SKIP.to_string(), USE.to_string()],
            actions,
            last_actions: Vec::new(),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Normalize and run one script, returning its rendered result.
    pub fn evaluate(&mut self, script: &str) -> Result<String, ReplError> {
        let body = normalize(script);
        let wrapped = format!("(function () {{\n{}\n}}).call(globalThis)", body);

        self.actions.take();
        let started = Instant::now();
        self.deadline.arm(self.timeout);

        let inspector = self.inspector;
        let result = self.context.with(|ctx| match ctx.eval::<Value, _>(wrapped).catch(&ctx) {
            Ok(value) => Ok(inspector.render(&value)),
            Err(caught) => Err(caught_to_error(caught, &inspector)),
        });
        let drained = self.drain_jobs();

        self.deadline.disarm();
        self.last_actions = self.actions.take();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if self.deadline.tripped() {
            warn!(timeout_ms = self.timeout_ms(), elapsed_ms, "script interrupted");
            return Err(ReplError::Timeout { timeout_ms: self.timeout_ms(), elapsed_ms });
        }
        debug!(
            elapsed_ms,
            jobs = drained,
            actions = self.last_actions.len(),
            ok = result.is_ok(),
            "script evaluated"
        );
        result
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Run queued promise jobs until none remain or the deadline trips.
    fn drain_jobs(&self) -> usize {
        let mut ran = 0;
        while self.runtime.is_job_pending() && !self.deadline.tripped() {
            match self.runtime.execute_pending_job() {
                Ok(true) => ran += 1,
                Ok(false) => break,
                Err(_) => {
                    ran += 1;
                    warn!("pending job threw");
                }
            }
        }
        ran
    }

    /// Actions called by the most recent evaluation, in call order.
    pub fn last_actions(&self) -> &[ActionIntent] {
        &self.last_actions
    }

    /// Bind an action as a global. Each call counts against the per-turn
    /// limit, and the action is also reachable through `use(name, params)`.
    pub fn expose(&mut self, name: &str, function: HostFunction) -> Result<(), ReplError> {
        self.actions.register(name, Arc::clone(&function));
        let ledger = Arc::clone(&self.actions);
        self.context.with(|ctx| bind_host(&ctx, name, function, Some(ledger)))?;
        self.remember(name);
        debug!(name, "action exposed");
        Ok(())
    }

    /// Bind a helper that is not an action: uncounted and not reachable through `use`.
    pub fn expose_helper(&mut self, name: &str, function: HostFunction) -> Result<(), ReplError> {
        self.context.with(|ctx| bind_host(&ctx, name, function, None))?;
        self.remember(name);
        debug!(name, "helper exposed");
        Ok(())
    }

    fn remember(&mut self, name: &str) {
        if !self.exposed.iter().any(|n| n == name) {
            self.exposed.push(name.to_string());
        }
    }

    /// User-defined globals, sorted; exposed host functions are left out.
    pub fn globals(&self) -> Result<Vec<String>, ReplError> {
        let mut names = self.context.with(|ctx| {
            ctx.globals()
                .keys::<String>()
                .collect::<rquickjs::Result<Vec<String>>>()
        })?;
        names.retain(|n| !self.exposed.contains(n));
        names.sort();
        Ok(names)
    }
}

const USE: &str = "use";

fn bind_builtins<'js>(ctx: &Ctx<'js>, actions: &Arc<ActionLedger>) -> rquickjs::Result<()> {
    let ledger = Arc::clone(actions);
    let skip = Function::new(ctx.clone(), move |ctx: Ctx<'js>| -> rquickjs::Result<()> {
        ledger.record(SKIP, &[]).map_err(|message| Exception::throw_message(&ctx, &message))
    })?
    .with_name(SKIP)?;
    ctx.globals().set(SKIP, skip)?;

    let ledger = Arc::clone(actions);
    let use_fn = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let mut args = args.0.into_iter();
        let tool = match args.next().as_ref().and_then(Value::as_string) {
            Some(name) => name.to_string()?,
            None => String::new(),
        };
        if tool.is_empty() {
            return Err(Exception::throw_type(&ctx, "use(toolName, params) requires a non-empty string toolName"));
        }
        let params = match args.next() {
            Some(value) => to_json(&ctx, value)?,
            None => serde_json::Value::Null,
        };
        let params = if params.is_object() { params } else { serde_json::json!({}) };

        let Some(host) = ledger.lookup(&tool) else {
            return Err(Exception::throw_message(&ctx, &format!("Unknown tool: {}", tool)));
        };
        call_host(&ctx, &tool, &host, vec![params], Some(&ledger))
    })?
    .with_name(USE)?;
    ctx.globals().set(USE, use_fn)
}

fn bind_host<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    host: HostFunction,
    ledger: Option<Arc<ActionLedger>>,
) -> rquickjs::Result<()> {
    let label = name.to_string();
    let function = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        let mut json_args = Vec::with_capacity(args.0.len());
        for arg in args.0 {
            json_args.push(to_json(&ctx, arg)?);
        }
        call_host(&ctx, &label, &host, json_args, ledger.as_deref())
    })?
    .with_name(name)?;
    ctx.globals().set(name, function)
}

fn call_host<'js>(
    ctx: &Ctx<'js>,
    label: &str,
    host: &HostFunction,
    args: Vec<serde_json::Value>,
    ledger: Option<&ActionLedger>,
) -> rquickjs::Result<Value<'js>> {
    if let Some(ledger) = ledger {
        ledger.record(label, &args).map_err(|message| Exception::throw_message(ctx, &message))?;
    }
    match host(args) {
        Ok(result) => from_json(ctx, &result),
        Err(message) => Err(Exception::throw_message(ctx, &format!("{}: {}", label, message))),
    }
}

fn to_json<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> rquickjs::Result<serde_json::Value> {
    let Some(text) = ctx.json_stringify(value)? else {
        return Ok(serde_json::Value::Null);
    };
    let text = text.to_string()?;
    serde_json::from_str(&text).map_err(|e| Exception::throw_type(ctx, &format!("argument is not JSON: {}", e)))
}

fn from_json<'js>(ctx: &Ctx<'js>, value: &serde_json::Value) -> rquickjs::Result<Value<'js>> {
    let text = serde_json::to_string(value).map_err(|e| Exception::throw_internal(ctx, &e.to_string()))?;
    ctx.json_parse(text)
}

fn caught_to_error(caught: CaughtError<'_>, inspector: &Inspector) -> ReplError {
    match caught {
        CaughtError::Exception(exception) => ReplError::Exception {
            name: exception
                .as_object()
                .get::<_, Option<String>>("name")
                .ok()
                .flatten()
                .unwrap_or_else(|| "Error".into()),
            message: exception.message().unwrap_or_default(),
            stack: exception.stack(),
        },
        CaughtError::Value(value) => ReplError::Exception {
            name: "Uncaught".into(),
            message: inspector.render(&value),
            stack: None,
        },
        CaughtError::Error(e) => ReplError::Engine(e.to_string()),
    }
}

//! Console capture
//!
//! `console.log/error/warn/info` as host functions. Arguments are rendered to
//! text the moment they are logged, so later guest mutation cannot change what
//! was recorded and no VM value is retained.

use jsbox_core::{LogEntry, LogLevel};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Object, Value};
use std::cell::RefCell;
use std::rc::Rc;

use crate::marshal;

/// Ordered log of one execution, shared with the host functions that fill it
#[derive(Debug, Clone, Default)]
pub struct ConsoleLog(Rc<RefCell<Vec<LogEntry>>>);

impl ConsoleLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: LogLevel, content: String) {
        self.0.borrow_mut().push(LogEntry::new(level, content));
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Drain the entries, leaving the log empty for the next execution.
    pub fn take(&self) -> Vec<LogEntry> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Install a fresh `console` global whose methods append to `log`.
pub fn install<'js>(ctx: &Ctx<'js>, log: &ConsoleLog) -> rquickjs::Result<()> {
    let console = Object::new(ctx.clone())?;
    for level in LogLevel::ALL {
        console.set(level.as_str(), method(ctx, level, log.clone())?)?;
    }
    ctx.globals().set("console", console)?;
    Ok(())
}

/// One capturing console method.
pub fn method<'js>(ctx: &Ctx<'js>, level: LogLevel, log: ConsoleLog) -> rquickjs::Result<Function<'js>> {
    Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
        log.push(level, format_args(&ctx, &args.0));
    })
}

/// Render console arguments the way the browser joins them: space separated.
pub fn format_args<'js>(ctx: &Ctx<'js>, args: &[Value<'js>]) -> String {
    args.iter()
        .map(|arg| marshal::stringify(ctx, arg))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn capture(source: &str) -> Vec<LogEntry> {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        let log = ConsoleLog::new();
        context.with(|ctx| {
            install(&ctx, &log).unwrap();
            ctx.eval::<(), _>(source).unwrap();
        });
        log.take()
    }

    #[test]
    fn levels_and_order_are_preserved() {
        let entries = capture("console.log('a'); console.warn('b'); console.error('c'); console.info('d');");
        let seen: Vec<(LogLevel, &str)> = entries
            .iter()
            .map(|entry| (entry.level, entry.content.as_str()))
            .collect();
        assert_eq!(
            seen,
            vec![
                (LogLevel::Log, "a"),
                (LogLevel::Warn, "b"),
                (LogLevel::Error, "c"),
                (LogLevel::Info, "d"),
            ]
        );
        assert!(entries.windows(2).all(|pair| pair[0].timestamp <= pair[1].timestamp));
    }

    #[test]
    fn arguments_are_joined_and_serialized() {
        let entries = capture("console.log('count:', 3, {ok: true}, [1])");
        assert_eq!(entries[0].content, "count: 3 {\n  \"ok\": true\n} [\n  1\n]");
    }

    #[test]
    fn values_are_captured_at_call_time() {
        let entries = capture("const o = {n: 1}; console.log(o); o.n = 2; console.log(o);");
        assert_eq!(entries[0].content, "{\n  \"n\": 1\n}");
        assert_eq!(entries[1].content, "{\n  \"n\": 2\n}");
    }

    #[test]
    fn cyclic_arguments_do_not_break_capture() {
        let entries = capture("const o = {}; o.o = o; console.log('cyclic', o); console.log('after');");
        assert_eq!(entries[0].content, "cyclic [object Object]");
        assert_eq!(entries[1].content, "after");
    }

    #[test]
    fn no_arguments_logs_empty_line() {
        let entries = capture("console.info()");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].content, "");
        assert_eq!(entries[0].level, LogLevel::Info);
    }

    #[test]
    fn take_drains_the_log() {
        let log = ConsoleLog::new();
        log.push(LogLevel::Log, "x".into());
        assert_eq!(log.len(), 1);
        assert_eq!(log.take().len(), 1);
        assert!(log.is_empty());
    }
}

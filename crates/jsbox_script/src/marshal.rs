//! Copying values out of the VM as text
//!
//! Console arguments and completion values leave the VM as plain Rust strings
//! so no VM handle outlives the context that produced it.

use rquickjs::{Ctx, Function, Object, Type, Value};

/// Render a value the way console capture and completion values do:
/// strings verbatim, everything else as pretty-printed JSON, with a
/// single-line description when JSON has nothing to offer.
pub fn stringify<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    to_json(ctx, value).unwrap_or_else(|| describe(ctx, value))
}

/// Completion value of an execution. `undefined` has no rendering.
pub fn completion<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    if value.is_undefined() {
        return None;
    }
    Some(stringify(ctx, value))
}

/// `JSON.stringify(value, undefined, 2)`, or `None` when it throws (cycles,
/// BigInt) or produces `undefined` (functions, symbols).
pub fn to_json<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    let json: Object<'js> = ctx.globals().get("JSON").ok()?;
    let stringify: Function<'js> = json.get("stringify").ok()?;
    match stringify.call::<_, Value<'js>>((value.clone(), Value::new_undefined(ctx.clone()), 2)) {
        Ok(out) => out.as_string().and_then(|s| s.to_string().ok()),
        Err(err) => {
            discard_exception(ctx, &err);
            None
        }
    }
}

/// Best-effort single-line form for values JSON cannot express.
pub fn describe<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> String {
    match value.type_of() {
        Type::Undefined => "undefined".to_string(),
        Type::Null => "null".to_string(),
        Type::Function | Type::Constructor => match property_string(value, "name") {
            Some(name) if !name.is_empty() => format!("[Function: {name}]"),
            _ => "[Function (anonymous)]".to_string(),
        },
        Type::Array => {
            let len = value.as_array().map(|array| array.len()).unwrap_or(0);
            format!("[Array({len})]")
        }
        Type::Object | Type::Exception | Type::Promise => {
            let constructor = value
                .as_object()
                .and_then(|object| object.get::<_, Value<'js>>("constructor").ok())
                .and_then(|constructor| property_string(&constructor, "name"))
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| "Object".to_string());
            format!("[object {constructor}]")
        }
        other => call_string(ctx, value).unwrap_or_else(|| format!("[{other:?}]")),
    }
}

/// `String(value)`
fn call_string<'js>(ctx: &Ctx<'js>, value: &Value<'js>) -> Option<String> {
    let string: Function<'js> = ctx.globals().get("String").ok()?;
    match string.call::<_, String>((value.clone(),)) {
        Ok(text) => Some(text),
        Err(err) => {
            discard_exception(ctx, &err);
            None
        }
    }
}

fn property_string<'js>(value: &Value<'js>, key: &str) -> Option<String> {
    value
        .as_object()
        .and_then(|object| object.get::<_, Option<String>>(key).ok())
        .flatten()
}

/// A failed host-side call leaves the thrown value pending on the context.
/// Take it so it cannot be mistaken for a guest throw later.
pub(crate) fn discard_exception(ctx: &Ctx<'_>, err: &rquickjs::Error) {
    if matches!(err, rquickjs::Error::Exception) {
        let _ = ctx.catch();
    }
}

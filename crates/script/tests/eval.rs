use std::any::Any;

use kubelint_script::{
    eval_expression, CompiledScript, EvalResult, HostObject, Interpreter, ScriptErrorKind, ScriptLimits, ScriptMode,
    Value,
};
use serde_json::json;

fn block(src: &str) -> Value {
    block_with(src, &[])
}

fn block_with(src: &str, bindings: &[(&str, Value)]) -> Value {
    let script = CompiledScript::compile(src, ScriptMode::Block).expect("compile");
    script.run(&mut Interpreter::new(ScriptLimits::default()), bindings).expect("run")
}

fn block_err(src: &str, limits: ScriptLimits) -> ScriptErrorKind {
    let script = CompiledScript::compile(src, ScriptMode::Block).expect("compile");
    script.run(&mut Interpreter::new(limits), &[]).expect_err("should fail").kind
}

#[test]
fn expressions_follow_script_semantics() {
    assert_eq!(eval_expression("1 + 2 * 3", &[]).unwrap().to_json(), json!(7));
    assert_eq!(eval_expression("'a' + 1", &[]).unwrap().to_json(), json!("a1"));
    assert_eq!(eval_expression("1 == '1' && 1 !== '1' && null == undefined", &[]).unwrap().to_json(), json!(true));
    assert_eq!(eval_expression("typeof missing", &[]).unwrap().to_json(), json!("undefined"));
    assert_eq!(eval_expression("(10).toFixed(2)", &[]).unwrap().to_json(), json!("10.00"));
    assert_eq!(eval_expression("String(0.5) + '/' + String(3)", &[]).unwrap().to_json(), json!("0.5/3"));
}

#[test]
fn bindings_are_visible_to_the_script() {
    let config = Value::from_json(&json!({"spec": {"replicas": 1}}));
    let v = block_with("if (config.spec.replicas < 2) { return 'too few' } return 'ok'", &[("config", config)]);
    assert_eq!(v.to_json(), json!("too few"));
}

#[test]
fn arrays_closures_and_templates() {
    let v = block(
        r#"
        const xs = [1, 2, 3]
        const doubled = xs.map(x => x * 2).filter(x => x > 2)
        let total = 0
        for (const x of doubled) total += x
        return `${doubled.join(',')}:${total}`
        "#,
    );
    assert_eq!(v.to_json(), json!("4,6:10"));
}

#[test]
fn for_loops_bind_a_fresh_variable_per_iteration() {
    let v = block("const fs = []; for (let i = 0; i < 3; i++) { fs.push(() => i) } return fs.map(f => f())");
    assert_eq!(v.to_json(), json!([0, 1, 2]));
}

#[test]
fn destructuring_with_defaults_and_rest() {
    let v = block("const {a, b: [c, ...rest], d = 5} = {a: 1, b: [2, 3, 4]}; return [a, c, rest.length, d]");
    assert_eq!(v.to_json(), json!([1, 2, 2, 5]));
}

#[test]
fn objects_spread_and_in_operator() {
    let v = block("const base = {a: 1, b: 2}; const o = {...base, b: 3, ['c' + 1]: 4}; return [o.b, 'c1' in o, 'z' in o]");
    assert_eq!(v.to_json(), json!([3, true, false]));
}

#[test]
fn try_catch_observes_type_errors() {
    assert_eq!(block("try { null.x } catch (e) { return e.name }").to_json(), json!("TypeError"));
    assert_eq!(block("try { throw new Error('boom') } catch (e) { return e.message }").to_json(), json!("boom"));
    assert_eq!(block("let n = 0; try { n = 1 } finally { n = 2 } return n").to_json(), json!(2));
}

#[test]
fn uncaught_errors_are_typed() {
    let limits = ScriptLimits::default();
    assert_eq!(block_err("return foo + 1", limits), ScriptErrorKind::Reference("foo is not defined".into()));
    assert_eq!(block_err("const a = 1; a = 2", limits), ScriptErrorKind::Type("Assignment to constant variable.".into()));
    assert_eq!(block_err("throw 'custom failure'", limits), ScriptErrorKind::Thrown("custom failure".into()));
    match block_err("const x = {}; x.run()", limits) {
        ScriptErrorKind::Type(msg) => assert_eq!(msg, "x.run is not a function"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn runaway_loops_hit_the_step_budget() {
    let limits = ScriptLimits { max_steps: 10_000, max_call_depth: 50, ..ScriptLimits::default() };
    assert!(matches!(block_err("while (true) {}", limits), ScriptErrorKind::LimitExceeded(_)));
    // the budget cannot be swallowed by catch
    assert!(matches!(
        block_err("try { for (;;) {} } catch (e) { return 1 }", limits),
        ScriptErrorKind::LimitExceeded(_)
    ));
}

#[test]
fn unbounded_recursion_hits_the_depth_limit() {
    let limits = ScriptLimits { max_steps: 1_000_000, max_call_depth: 20, ..ScriptLimits::default() };
    let err = block_err("function f(n) { return f(n + 1) } return f(0)", limits);
    assert!(matches!(err, ScriptErrorKind::LimitExceeded(msg) if msg.contains("call depth")));
}

#[test]
fn syntax_errors_are_reported_at_compile_time() {
    let err = CompiledScript::compile("let x = ;", ScriptMode::Block).unwrap_err();
    assert!(err.is_syntax());
    assert!(err.message().contains("line 1"));
    assert!(CompiledScript::compile("ApiVersion('v1'", ScriptMode::Expression).is_err());
}

#[test]
fn regular_expressions_and_string_methods() {
    assert_eq!(eval_expression(r"/^v\d+$/.test('v12')", &[]).unwrap().to_json(), json!(true));
    assert_eq!(eval_expression("'a-b-c'.replace(/-/g, '+')", &[]).unwrap().to_json(), json!("a+b+c"));
    assert_eq!(eval_expression("'nginx:1.25'.split(':')[1]", &[]).unwrap().to_json(), json!("1.25"));
    assert_eq!(eval_expression("'  Latest '.trim().toLowerCase()", &[]).unwrap().to_json(), json!("latest"));
}

#[test]
fn json_and_sorting() {
    assert_eq!(
        eval_expression("JSON.stringify({b: 1, a: [1, 'x']})", &[]).unwrap().to_json(),
        json!(r#"{"b":1,"a":[1,"x"]}"#)
    );
    assert_eq!(eval_expression("[3, 1, 2].sort((a, b) => a - b)", &[]).unwrap().to_json(), json!([1, 2, 3]));
    assert_eq!(eval_expression("Object.keys({x: 1, y: 2})", &[]).unwrap().to_json(), json!(["x", "y"]));
}

#[test]
fn lodash_helpers() {
    let data = Value::from_json(&json!({"a": {"b": [{"n": 2}, {"n": 1}]}}));
    let v = block_with(
        r#"
        return [
            _.get(data, 'a.b[0].n'),
            _.get(data, 'a.missing', 'dflt'),
            _.uniq([1, 1, 2]),
            _.sortBy(data.a.b, 'n').map(x => x.n),
            _.stableStringify({z: 1, a: 2}),
            _.isEmpty({}),
            _.includes(['x', 'y'], 'y'),
        ]
        "#,
        &[("data", data)],
    );
    assert_eq!(v.to_json(), json!([2, "dflt", [1, 2], [1, 2], r#"{"a":2,"z":1}"#, true, true]));
}

#[test]
fn optional_chaining_short_circuits() {
    let config = Value::from_json(&json!({"spec": {}}));
    let v = block_with("return [config?.spec?.missing?.deep, config.nothing?.(), config.spec.x ?? 'none']", &[("config", config)]);
    assert_eq!(v.to_json(), json!([null, null, "none"]));
}

struct Fixed;

impl HostObject for Fixed {
    fn type_name(&self) -> &str {
        "Fixed"
    }

    fn get(&self, _interp: &mut Interpreter, key: &str) -> EvalResult<Value> {
        Ok(match key {
            "kind" => Value::from("Deployment"),
            _ => Value::Undefined,
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn host_objects_are_read_only() {
    let host = Value::host(Fixed);
    assert_eq!(block_with("return item.kind", &[("item", host.clone())]).to_json(), json!("Deployment"));
    let script = CompiledScript::compile("item.kind = 'Pod'", ScriptMode::Block).unwrap();
    let err = script.run(&mut Interpreter::new(ScriptLimits::default()), &[("item", host)]).unwrap_err();
    assert!(matches!(err.kind, ScriptErrorKind::Type(_)));
}

#[test]
fn builtins_cannot_be_reassigned() {
    let err = block_err("Math = 1", ScriptLimits::default());
    assert!(matches!(err, ScriptErrorKind::Type(_)));
    // and shadowing stays local to the run
    assert_eq!(block("const Math = 2; return Math").to_json(), json!(2));
    assert_eq!(eval_expression("Math.max(1, 4, 2)", &[]).unwrap().to_json(), json!(4));
}

#[test]
fn each_run_gets_a_fresh_step_budget() {
    let script = CompiledScript::compile("let n = 0; for (let i = 0; i < 200; i++) n += i; return n", ScriptMode::Block)
        .expect("compile");
    let mut interp = Interpreter::new(ScriptLimits { max_steps: 20_000, ..ScriptLimits::default() });
    for _ in 0..20 {
        assert_eq!(script.run(&mut interp, &[]).expect("run").to_json(), json!(19900));
    }
}

#[test]
fn huge_array_indices_throw_instead_of_allocating() {
    let err = block_err("const a = []; a[1e15] = 1; return a.length", ScriptLimits::default());
    assert!(matches!(err, ScriptErrorKind::Thrown(ref msg) if msg.contains("Invalid array length")), "{err:?}");
    let err = block_err("const a = [1]; a.length = 4294967295 * 1000", ScriptLimits::default());
    assert!(matches!(err, ScriptErrorKind::Thrown(ref msg) if msg.contains("Invalid array length")), "{err:?}");
    // scripts may recover from it
    assert_eq!(block("const a = []; try { a[1e12] = 1 } catch (e) { return e.name }").to_json(), json!("RangeError"));
    assert_eq!(block("const a = []; a[9] = 1; return a.length").to_json(), json!(10));
}

#[test]
fn doubling_arrays_hits_the_length_limit() {
    let limits = ScriptLimits { max_array_len: 1 << 12, ..ScriptLimits::default() };
    let err = block_err("let a = [1]; for (let i = 0; i < 64; i++) { a = a.concat(a) }", limits);
    assert!(matches!(err, ScriptErrorKind::Thrown(ref msg) if msg.contains("Invalid array length")), "{err:?}");
    let err = block_err("let a = [1]; for (let i = 0; i < 64; i++) { a = [...a, ...a] }", limits);
    assert!(matches!(err, ScriptErrorKind::Thrown(_)), "{err:?}");
}

#[test]
fn doubling_strings_hits_the_size_limit() {
    let limits = ScriptLimits { max_string_bytes: 1 << 16, ..ScriptLimits::default() };
    let err = block_err("let s = 'x'; for (let i = 0; i < 64; i++) { s += s }", limits);
    assert!(matches!(err, ScriptErrorKind::LimitExceeded(ref msg) if msg.contains("exceeds the limit")), "{err:?}");
    // the limit cannot be swallowed by catch
    let err = block_err("let s = 'x'; try { while (true) s = `${s}${s}` } catch (e) { return 1 }", limits);
    assert!(matches!(err, ScriptErrorKind::LimitExceeded(_)), "{err:?}");
    let err = block_err("return ['x'.repeat(40000), 'y'.repeat(40000)].join('')", limits);
    assert!(matches!(err, ScriptErrorKind::LimitExceeded(_)), "{err:?}");
    assert!(matches!(block_err("return 'a'.padStart(1e15)", limits), ScriptErrorKind::LimitExceeded(_)));
    assert_eq!(block("let s = 'ab'; for (let i = 0; i < 4; i++) s += s; return s.length").to_json(), json!(32));
}

#[test]
fn deeply_nested_source_is_a_syntax_error() {
    let src = format!("return {}1{}", "(".repeat(500), ")".repeat(500));
    let err = CompiledScript::compile(&src, ScriptMode::Block).unwrap_err();
    assert!(err.is_syntax(), "{err:?}");
    assert!(err.message().contains("nested too deeply"));
    let sum = format!("return {}", vec!["1"; 20_000].join(" + "));
    assert!(CompiledScript::compile(&sum, ScriptMode::Block).unwrap_err().is_syntax());
}

#[test]
fn deep_recursion_with_default_limits_is_stopped() {
    let err = block_err("function f(n) { return n == 0 ? 0 : f(n - 1) + 1 } return f(100000)", ScriptLimits::default());
    assert!(matches!(err, ScriptErrorKind::LimitExceeded(ref msg) if msg.contains("call depth")), "{err:?}");
    assert_eq!(block("function f(n) { return n == 0 ? 0 : f(n - 1) + 1 } return f(10)").to_json(), json!(10));
}

#[test]
fn compiled_scripts_debug_without_their_source() {
    let script = CompiledScript::compile("return 1", ScriptMode::Block).expect("compile");
    let shown = format!("{script:?}");
    assert!(shown.starts_with("CompiledScript"), "{shown}");
    assert!(shown.contains("len: 8"));
}

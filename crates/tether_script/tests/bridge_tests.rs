//! End-to-end tests for value exchange between host and guest

use chrono::{TimeZone, Utc};
use num_bigint::BigInt;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tether_script::{
    Array, Config, Context, Error, Kind, Map, Native, Runtime, Set, Type, TypedArray, Unmapped,
};

fn setup() -> (Runtime, Context) {
    let runtime = Runtime::with_config(Config::default()).expect("runtime");
    let context = runtime.new_context().expect("context");
    (runtime, context)
}

fn eval(context: &mut Context, source: &str) -> Native {
    context
        .eval(source)
        .and_then(|value| value.to_native())
        .unwrap_or_else(|err| panic!("{source}: {err}"))
}

#[test]
fn arithmetic_result() {
    let (_runtime, mut context) = setup();
    assert_eq!(eval(&mut context, "1 + 1"), Native::Int(2));
}

#[test]
fn array_literal() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "[1, 2]"),
        Native::Array(vec![Native::Int(1), Native::Int(2)])
    );
}

#[test]
fn map_entries_become_string_keyed() {
    let (_runtime, mut context) = setup();
    let native = eval(&mut context, "new Map([['k', 'v'], [1, true]])");
    let expected = HashMap::from([
        ("k".to_string(), Native::String("v".into())),
        ("1".to_string(), Native::Bool(true)),
    ]);
    assert_eq!(native, Native::Map(expected));
}

#[test]
fn set_keeps_insertion_order_without_duplicates() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "new Set([1, 2, 1])"),
        Native::Set(vec![Native::Int(1), Native::Int(2)])
    );
}

#[test]
fn typed_arrays_keep_element_type() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "Uint16Array.from([1, 2])"),
        Native::Uint16Array(vec![1, 2])
    );
    assert_eq!(
        eval(&mut context, "new Int32Array([-5, 7])"),
        Native::Int32Array(vec![-5, 7])
    );
    assert_eq!(
        eval(&mut context, "new Float64Array([1.5, -2.25])"),
        Native::Float64Array(vec![1.5, -2.25])
    );
    assert_eq!(
        eval(&mut context, "new BigInt64Array([-1n, 2n])"),
        Native::BigInt64Array(vec![-1, 2])
    );
}

#[test]
fn typed_array_view_respects_offset() {
    let (_runtime, mut context) = setup();
    let native = eval(
        &mut context,
        "new Uint8Array(new Uint8Array([9, 8, 7, 6]).buffer, 1, 2)",
    );
    assert_eq!(native, Native::Uint8Array(vec![8, 7]));
}

#[test]
fn array_buffer_becomes_bytes() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "new Uint8Array([1, 2, 3]).buffer"),
        Native::Bytes(vec![1, 2, 3])
    );
}

#[test]
fn numbers_split_into_int_and_float() {
    let (_runtime, mut context) = setup();
    assert_eq!(eval(&mut context, "2 ** 40"), Native::Int(1 << 40));
    assert_eq!(eval(&mut context, "0.5"), Native::Float(0.5));
    assert_eq!(eval(&mut context, "2 ** 53"), Native::Float(2f64.powi(53)));
    match eval(&mut context, "-0") {
        Native::Float(zero) => assert!(zero == 0.0 && zero.is_sign_negative()),
        other => panic!("expected -0 as float, got {other:?}"),
    }
}

#[test]
fn primitives_and_opaque_values() {
    let (_runtime, mut context) = setup();
    assert_eq!(eval(&mut context, "undefined"), Native::Null);
    assert_eq!(eval(&mut context, "null"), Native::Null);
    assert_eq!(eval(&mut context, "'héllo'"), Native::String("héllo".into()));
    assert_eq!(eval(&mut context, "({ a: 1 })"), Native::Opaque);
    assert_eq!(eval(&mut context, "Symbol('s')"), Native::Opaque);
}

#[test]
fn big_ints_of_any_size() {
    let (_runtime, mut context) = setup();
    assert_eq!(eval(&mut context, "10n"), Native::BigInt(BigInt::from(10)));
    let large: BigInt = "1180591620717411303424".parse().unwrap();
    assert_eq!(eval(&mut context, "2n ** 70n"), Native::BigInt(large.clone()));

    let global = context.global_object().unwrap();
    global.set("big", large).unwrap();
    assert_eq!(
        eval(&mut context, "typeof big === 'bigint' && big === 2n ** 70n"),
        Native::Bool(true)
    );
}

#[test]
fn dates_cross_in_both_directions() {
    let (_runtime, mut context) = setup();
    let expected = Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap();
    assert_eq!(
        eval(&mut context, "new Date(Date.UTC(2024, 0, 15, 12, 30))"),
        Native::Date(expected)
    );

    let global = context.global_object().unwrap();
    global.set("when", expected).unwrap();
    assert_eq!(
        eval(&mut context, "when.getUTCFullYear() * 100 + when.getUTCMonth()"),
        Native::Int(202400)
    );
}

#[test]
fn dates_outside_four_digit_years() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "new Date(Date.UTC(10000, 0, 1))"),
        Native::Date(Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap())
    );
    assert_eq!(
        eval(&mut context, "new Date(-1e14)"),
        Native::Date(chrono::DateTime::from_timestamp_millis(-100_000_000_000_000).unwrap())
    );
}

#[test]
fn unrepresentable_dates_are_conversion_errors() {
    let (_runtime, mut context) = setup();
    for source in ["new Date(NaN)", "new Date(8.64e15)"] {
        let result = context.eval(source).and_then(|value| value.to_native());
        assert!(
            matches!(result, Err(Error::Conversion { .. })),
            "{source}: {result:?}"
        );
    }
}

#[test]
fn sparse_arrays_fill_holes_with_null() {
    let (_runtime, mut context) = setup();
    assert_eq!(
        eval(&mut context, "const a = [1]; a.length = 5; a"),
        Native::Array(vec![
            Native::Int(1),
            Native::Null,
            Native::Null,
            Native::Null,
            Native::Null,
        ])
    );
    let wide = eval(&mut context, "Array.from({ length: 5000 }, (_, i) => i)");
    match wide {
        Native::Array(items) => {
            assert_eq!(items.len(), 5000);
            assert_eq!(items[4999], Native::Int(4999));
        }
        other => panic!("expected array, got {other:?}"),
    }
}

#[test]
fn kind_classification() {
    let (_runtime, mut context) = setup();
    let cases = [
        ("new Array()", Kind::Array),
        ("new Map()", Kind::Map),
        ("new Set()", Kind::Set),
        ("new Date()", Kind::Date),
        ("new Int32Array()", Kind::Int32Array),
        ("new ArrayBuffer(4)", Kind::ArrayBuffer),
        ("({})", Kind::Unknown),
    ];
    for (source, expected) in cases {
        let object = context.eval(source).unwrap().retain().into_object().unwrap();
        assert_eq!(object.kind().unwrap(), expected, "{source}");
    }
}

#[test]
fn classification_ignores_reassigned_globals() {
    let (_runtime, mut context) = setup();
    let map = context
        .eval("const M = Map; globalThis.Map = function () {}; new M()")
        .unwrap()
        .retain()
        .into_object()
        .unwrap();
    assert_eq!(map.kind().unwrap(), Kind::Map);
}

#[test]
fn views_check_kind_before_reading() {
    let (_runtime, mut context) = setup();
    let floats = context
        .eval("new Float32Array([0.5, 1.5])")
        .unwrap()
        .retain()
        .into_object()
        .unwrap();
    let view = floats.downcast::<TypedArray<f32>>().unwrap();
    assert_eq!(view.len().unwrap(), 2);
    assert_eq!(view.to_native().unwrap(), vec![0.5, 1.5]);
    assert!(matches!(
        floats.downcast::<TypedArray<i32>>(),
        Err(Error::Conversion { .. })
    ));
    assert!(floats.downcast::<Array>().is_err());

    let list = context
        .eval("[3, 'x']")
        .unwrap()
        .retain()
        .into_object()
        .unwrap();
    let array = list.downcast::<Array>().unwrap();
    assert_eq!(array.len().unwrap(), 2);
    assert_eq!(array.get(1).unwrap().to_native().unwrap(), Native::String("x".into()));

    let set = context.eval("new Set(['a'])").unwrap().retain().into_object().unwrap();
    assert_eq!(set.downcast::<Set>().unwrap().size().unwrap(), 1);
    let map = context.eval("new Map([['a', 1]])").unwrap().retain().into_object().unwrap();
    assert_eq!(map.downcast::<Map>().unwrap().size().unwrap(), 1);
}

#[test]
fn scalar_round_trip_through_properties() {
    let (_runtime, context) = setup();
    let global = context.global_object().unwrap();
    global.set("flag", true).unwrap();
    global.set("small", -7i8).unwrap();
    global.set("wide", i64::MAX).unwrap();
    global.set("huge", u64::MAX).unwrap();
    global.set("ratio", 0.25f32).unwrap();
    global.set("name", "tether").unwrap();
    global.set("missing", None::<i32>).unwrap();

    let read = |name: &str| global.get(name).unwrap().to_native().unwrap();
    assert_eq!(read("flag"), Native::Bool(true));
    assert_eq!(read("small"), Native::Int(-7));
    // i64::MAX is not exactly representable as a guest number.
    assert_eq!(read("wide"), Native::Float(i64::MAX as f64));
    assert_eq!(read("huge"), Native::Float(u64::MAX as f64));
    assert_eq!(read("ratio"), Native::Float(0.25));
    assert_eq!(read("name"), Native::String("tether".into()));
    assert_eq!(read("missing"), Native::Null);
    assert_eq!(global.get("missing").unwrap().type_of().unwrap(), Type::Null);
}

#[test]
fn containers_round_trip_through_properties() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    global
        .set("list", vec![Native::Int(1), Native::String("two".into())])
        .unwrap();
    global.set("samples", vec![1.5f32, 2.5]).unwrap();
    global.set("bytes", vec![0xdeu8, 0xad]).unwrap();
    global
        .set("table", HashMap::from([("x".to_string(), Native::Int(1))]))
        .unwrap();

    assert_eq!(
        eval(&mut context, "Array.isArray(list) && list[1]"),
        Native::String("two".into())
    );
    assert_eq!(eval(&mut context, "samples instanceof Float32Array"), Native::Bool(true));
    assert_eq!(eval(&mut context, "bytes.byteLength"), Native::Int(2));
    assert_eq!(eval(&mut context, "table.get('x')"), Native::Int(1));
    assert_eq!(
        global.get("samples").unwrap().to_native().unwrap(),
        Native::Float32Array(vec![1.5, 2.5])
    );
}

#[test]
fn set_value_moves_existing_handles() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    let point = context.eval("({ x: 3 })").unwrap().retain();
    global.set_value("point", &point).unwrap();
    assert_eq!(eval(&mut context, "point.x"), Native::Int(3));
}

#[test]
fn method_calls_bind_this() {
    let (_runtime, mut context) = setup();
    let counter = context
        .eval("({ n: 1, add(k) { this.n += k; return this.n; } })")
        .unwrap()
        .retain()
        .into_object()
        .unwrap();
    let result = counter.call("add", &[Native::Int(4)]).unwrap();
    assert_eq!(result.to_native().unwrap(), Native::Int(5));
}

#[test]
fn host_callbacks_receive_all_arguments_in_order() {
    let (_runtime, mut context) = setup();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let global = context.global_object().unwrap();
    global
        .set_function("record", move |args| {
            let count = args.len();
            sink.borrow_mut().extend(args);
            Ok(Native::from(count))
        })
        .unwrap();

    assert_eq!(eval(&mut context, "record(1, 'a', null, [true])"), Native::Int(4));
    assert_eq!(
        *seen.borrow(),
        vec![
            Native::Int(1),
            Native::String("a".into()),
            Native::Null,
            Native::Array(vec![Native::Bool(true)]),
        ]
    );
}

#[test]
fn host_callbacks_return_structured_values() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    global
        .set_function("pair", |args| {
            let first = args.into_iter().next().unwrap_or(Native::Null);
            Ok(Native::Array(vec![first.clone(), first]))
        })
        .unwrap();
    assert_eq!(eval(&mut context, "pair(7).length + pair(7)[1]"), Native::Int(9));
}

#[test]
fn host_errors_surface_as_guest_exceptions() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    global
        .set_function("fail", |_| Err(anyhow::anyhow!("disk on fire")))
        .unwrap();

    assert_eq!(
        eval(&mut context, "try { fail() } catch (e) { e.message }"),
        Native::String("disk on fire".into())
    );
    let err = context.eval("fail()").unwrap_err();
    let exception = err.exception().expect("guest exception");
    assert!(exception.cause.contains("disk on fire"), "{}", exception.cause);
}

#[test]
fn unregistered_callbacks_throw() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    let handle = global.set_function("ping", |_| Ok(Native::Bool(true))).unwrap();
    assert_eq!(eval(&mut context, "ping()"), Native::Bool(true));
    assert_eq!(context.callback_count(), 1);

    assert!(context.unregister(handle));
    assert!(!context.unregister(handle));
    assert_eq!(context.callback_count(), 0);
    let err = context.eval("ping()").unwrap_err();
    assert!(matches!(err, Error::Eval(_)));
    assert!(err.to_string().contains("no longer registered"));
}

#[test]
fn registered_functions_can_be_attached_later() {
    let (_runtime, mut context) = setup();
    let (_handle, function) = context.register(|args| Ok(Native::from(args.len()))).unwrap();
    let global = context.global_object().unwrap();
    global.set_value("arity", &function).unwrap();
    assert_eq!(eval(&mut context, "arity(1, 2, 3)"), Native::Int(3));
}

#[test]
fn host_functions_can_be_passed_as_values() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    let double = tether_script::HostFn::new(|args| {
        Ok(Native::from(args.first().and_then(Native::as_i64).unwrap_or(0) * 2))
    });
    global.set("double", double).unwrap();
    assert_eq!(eval(&mut context, "[1, 2].map(x => double(x))"), Native::Array(vec![
        Native::Int(2),
        Native::Int(4),
    ]));
}

#[test]
fn opaque_values_follow_the_unmapped_policy() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    global.set("thing", Native::Opaque).unwrap();
    assert_eq!(eval(&mut context, "thing === null"), Native::Bool(true));

    let strict = Runtime::with_config(Config {
        unmapped: Unmapped::Error,
        ..Config::default()
    })
    .unwrap();
    let context = strict.new_context().unwrap();
    let global = context.global_object().unwrap();
    assert!(matches!(
        global.set("thing", Native::Opaque),
        Err(Error::Conversion { .. })
    ));
}

#[test]
fn coerce_string_uses_guest_conversion() {
    let (_runtime, mut context) = setup();
    let value = context.eval("[1, [2, 3]]").unwrap().retain();
    assert_eq!(value.coerce_string().unwrap(), "1,2,3");
    assert!(value.as_object().is_some());
    assert!(context.eval("42").unwrap().as_object().is_none());
}

#[test]
fn callbacks_cannot_reenter_their_context() {
    let (_runtime, mut context) = setup();
    let global = context.global_object().unwrap();
    let captured = global.clone();
    global
        .set_function("peek", move |_| Ok(captured.get("x")?.to_native()?))
        .unwrap();

    match eval(&mut context, "globalThis.x = 1; try { peek() } catch (e) { e.message }") {
        Native::String(message) => assert!(message.contains("re-enter"), "{message}"),
        other => panic!("expected message, got {other:?}"),
    }
    assert!(matches!(context.eval("peek()"), Err(Error::Eval(_))));
    assert_eq!(eval(&mut context, "x + 1"), Native::Int(2));
    assert_eq!(global.get("x").unwrap().to_native().unwrap(), Native::Int(1));
}

#[test]
fn callbacks_cannot_reach_sibling_contexts() {
    let (runtime, mut context) = setup();
    let sibling = runtime.new_context().unwrap();
    let other = sibling.global_object().unwrap();
    context
        .global_object()
        .unwrap()
        .set_function("poke", move |_| {
            other.set("y", 1)?;
            Ok(Native::Null)
        })
        .unwrap();

    let err = context.eval("poke()").unwrap_err();
    assert!(err.to_string().contains("re-enter"), "{err}");
    assert!(runtime.new_context().is_ok());
}

#[test]
fn replacing_a_host_function_releases_the_old_entry() {
    let runtime = Runtime::with_config(Config {
        max_callbacks: 8,
        ..Config::default()
    })
    .unwrap();
    let mut context = runtime.new_context().unwrap();
    let global = context.global_object().unwrap();
    let one = tether_script::HostFn::new(|_| Ok(Native::Int(1)));
    for _ in 0..50 {
        global.set("one", one.clone()).unwrap();
    }
    for _ in 0..50 {
        global.set_function("two", |_| Ok(Native::Int(2))).unwrap();
    }
    runtime.run_gc().unwrap();
    assert_eq!(context.callback_count(), 2);
    assert_eq!(eval(&mut context, "one() + two()"), Native::Int(3));

    context.eval("delete globalThis.one").unwrap();
    runtime.run_gc().unwrap();
    assert_eq!(context.callback_count(), 1);
}

#[test]
fn functions_returned_by_callbacks_are_released_after_use() {
    let runtime = Runtime::with_config(Config {
        max_callbacks: 8,
        ..Config::default()
    })
    .unwrap();
    let mut context = runtime.new_context().unwrap();
    let global = context.global_object().unwrap();
    global
        .set_function("mk", |_| {
            Ok(Native::Function(tether_script::HostFn::new(|_| {
                Ok(Native::Int(1))
            })))
        })
        .unwrap();
    assert_eq!(
        eval(&mut context, "let n = 0; for (let i = 0; i < 50; i++) n += mk()(); n"),
        Native::Int(50)
    );
    runtime.run_gc().unwrap();
    assert_eq!(context.callback_count(), 1);
}

#[test]
fn dropping_a_registered_function_stales_its_handle() {
    let (runtime, context) = setup();
    let (handle, function) = context.register(|_| Ok(Native::Null)).unwrap();
    assert_eq!(context.callback_count(), 1);
    drop(function);
    runtime.run_gc().unwrap();
    assert_eq!(context.callback_count(), 0);
    assert!(!context.unregister(handle));
}

#[cfg(test)]
mod call_tests {
    use std::time::Duration;

    use phlox::env::{ClassDef, Env, Function, Param};
    use phlox::error::PhloxError;
    use phlox::expr::{BinaryOp, Expr, Location};
    use phlox::factory::{ClassScope, ExprFactory};
    use phlox::value::Value;

    fn loc() -> Location {
        Location::new("test.php", 1)
    }

    fn eval(env: &mut Env, expr: &Expr) -> Value {
        let _ = env_logger::builder().is_test(true).try_init();
        expr.eval(env).expect("evaluation should succeed")
    }

    /// `$name + 1` as a function body, operating on the parameter.
    fn add_one_body(f: &ExprFactory, name: &str) -> Expr {
        f.binary(BinaryOp::Add, f.var(name), f.long_literal(1))
    }

    #[test]
    fn test_call_01_native_function() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::native("answer", Vec::new(), |_env, _args| {
            Ok(Value::Long(42))
        }));

        let call = f.call(loc(), "answer", Vec::new()).unwrap();
        assert_eq!(eval(&mut env, &call), Value::Long(42));
    }

    #[test]
    fn test_call_02_expression_body_function() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "succ",
            vec![Param::new("n")],
            add_one_body(&f, "n"),
        ));

        let call = f.call(loc(), "succ", vec![f.long_literal(9)]).unwrap();
        assert_eq!(eval(&mut env, &call), Value::Long(10));
    }

    #[test]
    fn test_call_03_function_names_are_case_insensitive() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::native("Answer", Vec::new(), |_env, _args| {
            Ok(Value::Long(42))
        }));

        let call = f.call(loc(), "ANSWER", Vec::new()).unwrap();
        assert_eq!(eval(&mut env, &call), Value::Long(42));
    }

    #[test]
    fn test_call_04_undefined_function_warns_and_yields_null() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let call = f.call(loc(), "missing", Vec::new()).unwrap();

        assert_eq!(eval(&mut env, &call), Value::Null);
        assert_eq!(env.warnings().len(), 1);
        assert!(env.warnings()[0].contains("missing"));
    }

    #[test]
    fn test_call_05_failed_lookup_is_retried_after_definition() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let call = f.call(loc(), "late", Vec::new()).unwrap();

        // first evaluation fails soft
        assert_eq!(eval(&mut env, &call), Value::Null);

        env.define_function(Function::native("late", Vec::new(), |_env, _args| {
            Ok(Value::Long(7))
        }));

        // the same node resolves now: failure was not cached
        assert_eq!(eval(&mut env, &call), Value::Long(7));
    }

    #[test]
    fn test_call_06_by_value_parameters_are_isolated() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "clobber",
            vec![Param::new("x")],
            f.assign(f.var("x"), f.long_literal(99)).unwrap(),
        ));

        env.set_value("n", Value::Long(1));

        let call = f.call(loc(), "clobber", vec![f.var("n")]).unwrap();
        eval(&mut env, &call);

        assert_eq!(env.get_value("n"), Value::Long(1));
    }

    #[test]
    fn test_call_07_by_ref_parameters_alias_the_caller() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "bump",
            vec![Param::by_ref("x")],
            f.assign(f.var("x"), add_one_body(&f, "x")).unwrap(),
        ));

        env.set_value("n", Value::Long(1));

        let call = f.call(loc(), "bump", vec![f.var("n")]).unwrap();
        eval(&mut env, &call);
        eval(&mut env, &call);

        assert_eq!(env.get_value("n"), Value::Long(3));
    }

    #[test]
    fn test_call_08_by_ref_with_a_non_variable_warns() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "bump",
            vec![Param::by_ref("x")],
            f.assign(f.var("x"), add_one_body(&f, "x")).unwrap(),
        ));

        let call = f.call(loc(), "bump", vec![f.long_literal(5)]).unwrap();

        assert_eq!(eval(&mut env, &call), Value::Long(6));
        assert!(env.warnings()[0].contains("by reference"));
    }

    #[test]
    fn test_call_09_default_parameters_fill_missing_arguments() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "greet",
            vec![Param::with_default("name", Value::string("world"))],
            f.append(f.string_literal("hello "), f.var("name")),
        ));

        let call = f.call(loc(), "greet", Vec::new()).unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("hello world"));

        let call = f
            .call(loc(), "greet", vec![f.string_literal("there")])
            .unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("hello there"));
    }

    #[test]
    fn test_call_10_missing_required_argument_warns_and_binds_null() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "need",
            vec![Param::new("x")],
            f.var("x"),
        ));

        let call = f.call(loc(), "need", Vec::new()).unwrap();

        assert_eq!(eval(&mut env, &call), Value::Null);
        assert!(env.warnings()[0].contains("missing argument 1"));
    }

    #[test]
    fn test_call_11_computed_function_name() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::native("answer", Vec::new(), |_env, _args| {
            Ok(Value::Long(42))
        }));

        env.set_value("fn", Value::string("answer"));

        let call = f.call_var(loc(), f.var("fn"), Vec::new());
        assert_eq!(eval(&mut env, &call), Value::Long(42));
    }

    #[test]
    fn test_call_12_instance_methods_see_this() {
        let scoped = ExprFactory::with_class_scope(ClassScope::new("Counter", None));
        let f = ExprFactory::new();
        let mut env = Env::new();

        let mut counter = ClassDef::new("Counter", None);
        counter.add_field("n", Value::Long(0));
        counter.add_method(Function::from_expr(
            "inc",
            Vec::new(),
            scoped
                .assign(
                    scoped.field_get(scoped.this(), "n"),
                    scoped.binary(
                        BinaryOp::Add,
                        scoped.field_get(scoped.this(), "n"),
                        scoped.long_literal(1),
                    ),
                )
                .unwrap(),
        ));
        env.define_class(counter);

        let make = f
            .assign(
                f.var("c"),
                f.new_object(loc(), "Counter", Vec::new()).unwrap(),
            )
            .unwrap();
        eval(&mut env, &make);

        let inc = f.method_call(loc(), f.var("c"), "inc", Vec::new());
        eval(&mut env, &inc);
        eval(&mut env, &inc);

        assert_eq!(env.get_value("c").get_field("n"), Value::Long(2));
        // the receiver does not leak out of the call
        assert!(env.get_this().is_none());
    }

    #[test]
    fn test_call_13_method_names_are_case_insensitive() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let mut class = ClassDef::new("Greeter", None);
        class.add_method(Function::from_expr(
            "Greet",
            Vec::new(),
            f.string_literal("hi"),
        ));
        env.define_class(class);

        let make = f
            .assign(
                f.var("g"),
                f.new_object(loc(), "Greeter", Vec::new()).unwrap(),
            )
            .unwrap();
        eval(&mut env, &make);

        let call = f.method_call(loc(), f.var("g"), "GREET", Vec::new());
        assert_eq!(eval(&mut env, &call), Value::string("hi"));
    }

    #[test]
    fn test_call_14_method_call_on_non_object_warns() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.set_value("x", Value::Long(3));

        let call = f.method_call(loc(), f.var("x"), "anything", Vec::new());

        assert_eq!(eval(&mut env, &call), Value::Null);
        assert!(env.warnings()[0].contains("non-object"));
    }

    #[test]
    fn test_call_15_unknown_method_warns_and_yields_null() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_class(ClassDef::new("Empty", None));

        let make = f
            .assign(
                f.var("e"),
                f.new_object(loc(), "Empty", Vec::new()).unwrap(),
            )
            .unwrap();
        eval(&mut env, &make);

        let call = f.method_call(loc(), f.var("e"), "nope", Vec::new());

        assert_eq!(eval(&mut env, &call), Value::Null);
        assert!(env.warnings()[0].contains("nope"));
    }

    #[test]
    fn test_call_16_late_static_binding_resolves_the_called_class() {
        let base_scope = ExprFactory::with_class_scope(ClassScope::new("A", None));
        let f = ExprFactory::new();
        let mut env = Env::new();

        // class A { who() -> "A"; test() -> static::who() }
        let mut a = ClassDef::new("A", None);
        a.add_method(Function::from_expr(
            "who",
            Vec::new(),
            base_scope.string_literal("A"),
        ));
        a.add_method(Function::from_expr(
            "test",
            Vec::new(),
            base_scope
                .class_method_call(loc(), "static", "who", Vec::new())
                .unwrap(),
        ));
        env.define_class(a);

        // class B extends A { who() -> "B" }
        let mut b = ClassDef::new("B", Some("A"));
        b.add_method(Function::from_expr(
            "who",
            Vec::new(),
            f.string_literal("B"),
        ));
        env.define_class(b);

        // B::test() runs A's body, but static:: binds to B
        let call = f
            .class_method_call(loc(), "B", "test", Vec::new())
            .unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("B"));

        let call = f
            .class_method_call(loc(), "A", "test", Vec::new())
            .unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("A"));
    }

    #[test]
    fn test_call_17_constructor_runs_on_new() {
        let scoped = ExprFactory::with_class_scope(ClassScope::new("Point", None));
        let f = ExprFactory::new();
        let mut env = Env::new();

        let mut point = ClassDef::new("Point", None);
        point.add_method(Function::from_expr(
            "__construct",
            vec![Param::new("x")],
            scoped
                .assign(scoped.field_get(scoped.this(), "x"), scoped.var("x"))
                .unwrap(),
        ));
        env.define_class(point);

        let make = f
            .assign(
                f.var("p"),
                f.new_object(loc(), "Point", vec![f.long_literal(5)]).unwrap(),
            )
            .unwrap();
        eval(&mut env, &make);

        assert_eq!(env.get_value("p").get_field("x"), Value::Long(5));
    }

    #[test]
    fn test_call_18_field_defaults_apply_base_first() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let mut base = ClassDef::new("Base", None);
        base.add_field("kind", Value::string("base"));
        base.add_field("shared", Value::Long(1));
        env.define_class(base);

        let mut derived = ClassDef::new("Derived", Some("Base"));
        derived.add_field("kind", Value::string("derived"));
        env.define_class(derived);

        let make = f
            .assign(
                f.var("d"),
                f.new_object(loc(), "Derived", Vec::new()).unwrap(),
            )
            .unwrap();
        eval(&mut env, &make);

        let d = env.get_value("d");
        assert_eq!(d.get_field("kind"), Value::string("derived"));
        assert_eq!(d.get_field("shared"), Value::Long(1));
    }

    #[test]
    fn test_call_19_new_unknown_class_is_fatal() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let make = f.new_object(loc(), "Missing", Vec::new()).unwrap();
        let result = make.eval(&mut env);

        assert!(matches!(result, Err(PhloxError::Fatal(_))));
    }

    #[test]
    fn test_call_20_timeout_propagates_and_unwinds() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::native("work", Vec::new(), |_env, _args| {
            Ok(Value::Long(1))
        }));
        env.set_value("outer", Value::Long(5));

        env.set_time_limit(Duration::ZERO);

        let call = f.call(loc(), "work", Vec::new()).unwrap();
        let result = call.eval(&mut env);

        assert!(matches!(result, Err(PhloxError::Timeout { .. })));
        assert_eq!(env.stack_depth(), 0, "the frame must be unwound");
        assert_eq!(env.get_value("outer"), Value::Long(5), "scope restored");

        env.clear_time_limit();
        assert_eq!(eval(&mut env, &call), Value::Long(1));
    }

    #[test]
    fn test_call_21_runaway_recursion_is_fatal() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.define_function(Function::from_expr(
            "spin",
            Vec::new(),
            f.call(loc(), "spin", Vec::new()).unwrap(),
        ));

        let call = f.call(loc(), "spin", Vec::new()).unwrap();
        let result = call.eval(&mut env);

        assert!(matches!(result, Err(PhloxError::Fatal(_))));
        assert_eq!(env.stack_depth(), 0);
    }

    #[test]
    fn test_call_22_call_results_are_copied_on_assignment() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        // builds a fresh array each call
        env.define_function(Function::native("make", Vec::new(), |_env, _args| {
            let arr = Value::new_array();
            if let Some(a) = arr.as_array() {
                a.borrow_mut().append_var().set(Value::Long(1));
            }
            Ok(arr)
        }));

        let call = f.call(loc(), "make", Vec::new()).unwrap();
        let store = f.assign(f.var("a"), call).unwrap();
        eval(&mut env, &store);

        let write = f
            .assign(
                f.array_get(loc(), f.var("a"), f.long_literal(0)),
                f.long_literal(9),
            )
            .unwrap();
        eval(&mut env, &write);

        assert_eq!(env.get_value("a").get(&Value::Long(0)), Value::Long(9));
    }

    #[test]
    fn test_call_23_class_constants_resolve_through_the_parent_chain() {
        let scoped = ExprFactory::with_class_scope(ClassScope::new("Derived", Some("Base")));
        let f = ExprFactory::new();
        let mut env = Env::new();

        let mut base = ClassDef::new("Base", None);
        base.add_constant("LIMIT", Value::Long(10));
        base.add_constant("KIND", Value::string("base"));
        env.define_class(base);

        let mut derived = ClassDef::new("Derived", Some("Base"));
        derived.add_constant("KIND", Value::string("derived"));
        env.define_class(derived);

        // own constant wins, inherited ones are found on the parent
        let read = f.class_const("Derived", "KIND", 1).unwrap();
        assert_eq!(eval(&mut env, &read), Value::string("derived"));

        let read = f.class_const("Derived", "LIMIT", 1).unwrap();
        assert_eq!(eval(&mut env, &read), Value::Long(10));

        // self:: resolves at construction against the lexical scope
        let read = scoped.class_const("self", "KIND", 1).unwrap();
        assert_eq!(eval(&mut env, &read), Value::string("derived"));

        let read = scoped.class_const("parent", "KIND", 1).unwrap();
        assert_eq!(eval(&mut env, &read), Value::string("base"));

        // an undefined constant warns and reads null
        let read = f.class_const("Derived", "NOPE", 1).unwrap();
        assert_eq!(eval(&mut env, &read), Value::Null);
        assert!(env.warnings()[0].contains("NOPE"));
    }

    #[test]
    fn test_call_24_static_constant_binds_to_the_called_class() {
        let base_scope = ExprFactory::with_class_scope(ClassScope::new("A", None));
        let f = ExprFactory::new();
        let mut env = Env::new();

        // class A { const NAME = "A"; tag() -> static::NAME }
        let mut a = ClassDef::new("A", None);
        a.add_constant("NAME", Value::string("A"));
        a.add_method(Function::from_expr(
            "tag",
            Vec::new(),
            base_scope.class_const("static", "NAME", 1).unwrap(),
        ));
        env.define_class(a);

        let mut b = ClassDef::new("B", Some("A"));
        b.add_constant("NAME", Value::string("B"));
        env.define_class(b);

        let call = f.class_method_call(loc(), "B", "tag", Vec::new()).unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("B"));

        let call = f.class_method_call(loc(), "A", "tag", Vec::new()).unwrap();
        assert_eq!(eval(&mut env, &call), Value::string("A"));
    }
}

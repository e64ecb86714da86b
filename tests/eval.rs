#[cfg(test)]
mod eval_tests {
    use phlox::env::Env;
    use phlox::expr::{BinaryOp, CastKind, Expr};
    use phlox::factory::ExprFactory;
    use phlox::value::Value;

    fn eval(env: &mut Env, expr: &Expr) -> Value {
        let _ = env_logger::builder().is_test(true).try_init();
        expr.eval(env).expect("evaluation should succeed")
    }

    #[test]
    fn test_eval_00_literal_reads_share_the_backing_string() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let lit = f.string_literal("stable");

        let first = eval(&mut env, &lit);
        let second = eval(&mut env, &lit);

        match (first, second) {
            (Value::Str(a), Value::Str(b)) => {
                assert!(std::rc::Rc::ptr_eq(&a, &b), "repeated reads must share")
            }
            _ => panic!("expected string values"),
        }
    }

    #[test]
    fn test_eval_01_long_arithmetic() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let sum = f.binary(BinaryOp::Add, f.long_literal(1), f.long_literal(2));
        assert_eq!(eval(&mut env, &sum), Value::Long(3));

        let product = f.binary(BinaryOp::Mul, f.long_literal(6), f.long_literal(7));
        assert_eq!(eval(&mut env, &product), Value::Long(42));
    }

    #[test]
    fn test_eval_02_string_operands_coerce_numerically() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let sum = f.binary(
            BinaryOp::Add,
            f.literal(Value::string("1.5")),
            f.long_literal(1),
        );
        assert_eq!(eval(&mut env, &sum), Value::Double(2.5));

        // "3 apples" + 2 reads the numeric prefix
        let sum = f.binary(
            BinaryOp::Add,
            f.literal(Value::string("3 apples")),
            f.long_literal(2),
        );
        assert_eq!(eval(&mut env, &sum), Value::Long(5));
    }

    #[test]
    fn test_eval_03_overflow_promotes_to_double() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let sum = f.binary(
            BinaryOp::Add,
            f.long_literal(i64::MAX),
            f.long_literal(1),
        );

        match eval(&mut env, &sum) {
            Value::Double(d) => assert!(d > i64::MAX as f64 - 2.0),
            other => panic!("expected a double, got {:?}", other.type_name()),
        }
    }

    #[test]
    fn test_eval_04_division_by_zero_warns_and_yields_false() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let div = f.binary(BinaryOp::Div, f.long_literal(1), f.long_literal(0));

        assert_eq!(eval(&mut env, &div), Value::Bool(false));
        assert_eq!(env.warnings().len(), 1);
        assert!(env.warnings()[0].contains("Division by zero"));
    }

    #[test]
    fn test_eval_05_even_long_division_stays_long() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let div = f.binary(BinaryOp::Div, f.long_literal(6), f.long_literal(3));
        assert_eq!(eval(&mut env, &div), Value::Long(2));

        let div = f.binary(BinaryOp::Div, f.long_literal(7), f.long_literal(2));
        assert_eq!(eval(&mut env, &div), Value::Double(3.5));
    }

    #[test]
    fn test_eval_06_suppression_drops_the_warning() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let div = f.binary(BinaryOp::Div, f.long_literal(1), f.long_literal(0));
        let quiet = f.suppress(div);

        assert_eq!(eval(&mut env, &quiet), Value::Bool(false));
        assert!(env.warnings().is_empty(), "@ should swallow the warning");

        // the mask is restored: the next unsuppressed warning records
        let div = f.binary(BinaryOp::Div, f.long_literal(1), f.long_literal(0));
        eval(&mut env, &div);
        assert_eq!(env.warnings().len(), 1);
    }

    #[test]
    fn test_eval_07_append_concatenates_left_to_right() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.set_value("name", Value::string("world"));

        let chain = f.append(
            f.string_literal("hello "),
            f.append(f.var("name"), f.string_literal("!")),
        );

        assert_eq!(eval(&mut env, &chain), Value::string("hello world!"));
    }

    #[test]
    fn test_eval_08_logical_operators_short_circuit() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        // $a stays unset: the right side must not run
        let or = f.or(
            f.bool_literal(true),
            f.assign(f.var("a"), f.long_literal(1)).unwrap(),
        );
        assert_eq!(eval(&mut env, &or), Value::Bool(true));
        assert!(!env.has_var("a"));

        let and = f.and(
            f.bool_literal(false),
            f.assign(f.var("a"), f.long_literal(1)).unwrap(),
        );
        assert_eq!(eval(&mut env, &and), Value::Bool(false));
        assert!(!env.has_var("a"));
    }

    #[test]
    fn test_eval_09_short_conditional_keeps_the_test_value() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.set_value("a", Value::string("kept"));

        let pick = f.conditional_short(f.var("a"), f.string_literal("fallback"));
        assert_eq!(eval(&mut env, &pick), Value::string("kept"));

        let pick = f.conditional_short(f.var("missing"), f.string_literal("fallback"));
        assert_eq!(eval(&mut env, &pick), Value::string("fallback"));
    }

    #[test]
    fn test_eval_10_null_increment_asymmetry() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        // $a++ on an unset variable returns the old null and stores 1
        let post = f.post_increment(f.var("a"), 1).unwrap();
        assert_eq!(eval(&mut env, &post), Value::Null);
        assert_eq!(env.get_value("a"), Value::Long(1));

        // null-- stays null
        let post = f.post_increment(f.var("b"), -1).unwrap();
        assert_eq!(eval(&mut env, &post), Value::Null);
        assert_eq!(env.get_value("b"), Value::Null);
    }

    #[test]
    fn test_eval_11_pre_increment_returns_the_new_value() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.set_value("n", Value::Long(9));

        let pre = f.pre_increment(f.var("n"), 1).unwrap();
        assert_eq!(eval(&mut env, &pre), Value::Long(10));
        assert_eq!(env.get_value("n"), Value::Long(10));
    }

    #[test]
    fn test_eval_12_loose_vs_strict_equality() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let loose = f.binary(
            BinaryOp::Eq,
            f.literal(Value::string("1")),
            f.long_literal(1),
        );
        assert_eq!(eval(&mut env, &loose), Value::Bool(true));

        let strict = f.binary(
            BinaryOp::Same,
            f.literal(Value::string("1")),
            f.long_literal(1),
        );
        assert_eq!(eval(&mut env, &strict), Value::Bool(false));
    }

    #[test]
    fn test_eval_13_falsy_strings() {
        assert!(!Value::string("").to_boolean());
        assert!(!Value::string("0").to_boolean());
        assert!(Value::string("00").to_boolean());
        assert!(Value::string("false").to_boolean());
    }

    #[test]
    fn test_eval_14_string_cast_of_whole_doubles() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let cast = f.cast(CastKind::Str, f.double_literal(3.0));
        assert_eq!(eval(&mut env, &cast), Value::string("3"));

        let cast = f.cast(CastKind::Str, f.double_literal(3.25));
        assert_eq!(eval(&mut env, &cast), Value::string("3.25"));
    }

    #[test]
    fn test_eval_15_scalar_to_object_cast_wraps_in_scalar_field() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let cast = f.cast(CastKind::Object, f.long_literal(7));
        let obj = eval(&mut env, &cast);

        assert!(obj.is_object());
        assert_eq!(obj.get_field("scalar"), Value::Long(7));
    }

    #[test]
    fn test_eval_16_char_at_reads_string_offsets() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        env.set_value("s", Value::string("abc"));

        let at = f.char_at(f.var("s"), f.long_literal(1));
        assert_eq!(eval(&mut env, &at), Value::string("b"));

        // out-of-range offsets read as null
        let at = f.char_at(f.var("s"), f.long_literal(9));
        assert_eq!(eval(&mut env, &at), Value::Null);
    }

    #[test]
    fn test_eval_17_reading_a_tail_append_fails() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let tail = f.array_tail(phlox::expr::UNKNOWN_LOCATION, f.var("a"));
        let result = tail.eval(&mut env);

        assert!(result.is_err(), "$a[] has no read context");
    }

    #[test]
    fn test_eval_18_xor_evaluates_both_sides() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let xor = f.xor(
            f.bool_literal(true),
            f.assign(f.var("touched"), f.long_literal(1)).unwrap(),
        );

        assert_eq!(eval(&mut env, &xor), Value::Bool(false));
        assert!(env.has_var("touched"));
    }

    #[test]
    fn test_eval_19_null_compares_as_empty_string() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        // null == "" but null != "0" (strings compare as strings)
        let eq = f.binary(
            BinaryOp::Eq,
            f.literal(Value::Null),
            f.literal(Value::string("")),
        );
        assert_eq!(eval(&mut env, &eq), Value::Bool(true));

        let eq = f.binary(
            BinaryOp::Eq,
            f.literal(Value::Null),
            f.literal(Value::string("0")),
        );
        assert_eq!(eval(&mut env, &eq), Value::Bool(false));

        // null == 0 still holds on the numeric side
        let eq = f.binary(BinaryOp::Eq, f.literal(Value::Null), f.long_literal(0));
        assert_eq!(eval(&mut env, &eq), Value::Bool(true));
    }

    #[test]
    fn test_eval_20_object_to_array_cast_converts_fields() {
        let f = ExprFactory::new();
        let mut env = Env::new();

        let make = f
            .assign(f.field_get(f.var("o"), "name"), f.string_literal("x"))
            .unwrap();
        eval(&mut env, &make);
        let more = f
            .assign(f.field_get(f.var("o"), "n"), f.long_literal(7))
            .unwrap();
        eval(&mut env, &more);

        let cast = f.cast(CastKind::Array, f.var("o"));
        let arr = eval(&mut env, &cast);

        assert!(arr.is_array());
        assert_eq!(arr.get(&Value::string("name")), Value::string("x"));
        assert_eq!(arr.get(&Value::string("n")), Value::Long(7));
    }
}

#[cfg(test)]
mod tests {
    use crate::{ScriptContext, ScriptEngine};
    use serde_json::json;

    fn context(pairs: &[(&str, serde_json::Value)]) -> ScriptContext {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_eval_condition() {
        let engine = ScriptEngine::new();

        let script = r#"
            if value > 30.0 {
                return true;
            } else {
                return false;
            }
        "#;

        engine.compile_script("cond_1", script).unwrap();

        assert!(engine.eval_condition("cond_1", &context(&[("value", json!(35.0))])).unwrap());
        assert!(!engine.eval_condition("cond_1", &context(&[("value", json!(20.0))])).unwrap());
    }

    #[test]
    fn test_dotted_keys_are_reachable_through_ctx() {
        let engine = ScriptEngine::new();
        engine
            .compile_script("dotted", r#"ctx["trigger.payload"].temp * 2"#)
            .unwrap();

        let ctx = context(&[("trigger.payload", json!({"temp": 21}))]);
        assert_eq!(engine.eval_action("dotted", &ctx).unwrap(), json!(42));
    }

    #[test]
    fn test_non_boolean_condition_is_an_error() {
        let engine = ScriptEngine::new();
        engine.compile_script("not_bool", "42").unwrap();
        assert!(engine.eval_condition("not_bool", &ScriptContext::new()).is_err());
    }

    #[test]
    fn test_unit_action_result_is_null() {
        let engine = ScriptEngine::new();
        engine.compile_script("unit", "let x = 1;").unwrap();
        assert_eq!(engine.eval_action("unit", &ScriptContext::new()).unwrap(), serde_json::Value::Null);
    }

    #[test]
    fn test_state_persistence() {
        let engine = ScriptEngine::new();

        let script = r#"
            let count = state_get("counter");
            if count == () {
                count = 0;
            }
            count = count + 1;
            state_set("counter", count);
            return count > 1;
        "#;

        engine.compile_script("state_rule", script).unwrap();

        // First run: count becomes 1. Returns false.
        assert!(!engine.eval_condition("state_rule", &ScriptContext::new()).unwrap());

        // Second run: count becomes 2. Returns true.
        assert!(engine.eval_condition("state_rule", &ScriptContext::new()).unwrap());
    }

    #[test]
    fn test_compile_error_and_removal() {
        let engine = ScriptEngine::new();
        assert!(engine.compile_script("broken", "let = ;").is_err());

        engine.compile_script("ok", "true").unwrap();
        assert_eq!(engine.get_script_ids(), vec!["ok".to_string()]);
        engine.remove_script("ok");
        assert!(engine.eval_condition("ok", &ScriptContext::new()).is_err());
    }
}

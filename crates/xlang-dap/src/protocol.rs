use serde::{Deserialize, Serialize};

/// Launch arguments for DAP launch configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchArgs {
    pub program: String,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub no_debug: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_defaults() {
        let args: LaunchArgs =
            serde_json::from_value(serde_json::json!({ "program": "/work/main.x" })).unwrap();
        assert_eq!(
            args,
            LaunchArgs {
                program: "/work/main.x".to_string(),
                stop_on_entry: false,
                no_debug: false,
            }
        );
    }

    #[test]
    fn test_launch_args_camel_case() {
        let args: LaunchArgs = serde_json::from_value(serde_json::json!({
            "program": "main.x",
            "stopOnEntry": true,
            "noDebug": true,
            "type": "xlang"
        }))
        .unwrap();
        assert!(args.stop_on_entry);
        assert!(args.no_debug);
    }

    #[test]
    fn test_launch_args_requires_program() {
        let result = serde_json::from_value::<LaunchArgs>(serde_json::json!({ "stopOnEntry": true }));
        assert!(result.is_err());
    }
}

/// `config_struct!` - config sections with embedded defaults
///
/// One declaration gives the struct, its `Default` impl and serde support
/// with `#[serde(default)]`, so a TOML file may set any subset of fields.
///
/// ```ignore
/// config_struct! {
///     pub struct QueueConfig {
///         capacity: usize = 256,
///         drain_timeout_ms: u64 = 500,
///     }
/// }
/// ```
#[macro_export]
macro_rules! config_struct {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_name:ident: $field_type:ty = $default_value:expr
            ),*
            $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
        #[serde(default)]
        $vis struct $name {
            $(
                $(#[$field_meta])*
                pub $field_name: $field_type,
            )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $(
                        $field_name: $default_value,
                    )*
                }
            }
        }
    };
}

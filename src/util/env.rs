//! Process configuration, deserialized straight out of the environment.
//!
//! The deserializer follows the shape of the [`envy`] crate: every variable becomes a map entry
//! keyed by its name, values are parsed on demand according to the target field's type, and
//! comma-separated values can be read into sequences. Two differences matter here:
//!
//! - `rename_all` and `rename` derive attributes work as expected.
//! - An empty value deserializes to `None` for optional fields, so `FOO=` in a `.env` file reads
//!   as "unset" instead of `Some("")`.
//!
//! [`envy`]: https://github.com/softprops/envy

use std::iter::{IntoIterator, empty};
use std::time::Duration;

use serde::Deserialize;
use serde::de::value::{MapDeserializer, SeqDeserializer};
use serde::de::{self, IntoDeserializer};
use thiserror::Error;

/// Runtime configuration, built once in `main` and handed to whatever needs it.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_scoresaber_api_url")]
    pub scoresaber_api_url: String,
    #[serde(default = "default_beatsaver_api_url")]
    pub beatsaver_api_url: String,
    #[serde(default = "default_beatsaver_map_url")]
    pub beatsaver_map_url: String,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    #[serde(default = "default_recent_page_limit")]
    pub recent_page_limit: u32,
    #[serde(default = "default_full_page_limit")]
    pub full_page_limit: u32,

    #[serde(default = "default_irc_server")]
    pub irc_server: String,
    #[serde(default = "default_irc_port")]
    pub irc_port: u16,
    pub irc_nick: String,
    pub irc_token: String,
    #[serde(default)]
    pub monitored_channels: Vec<String>,
    #[serde(default)]
    pub power_users: Vec<String>,
    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,

    #[serde(default = "default_api_port")]
    pub api_port: u16,
    pub internal_token: String,

    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

impl Config {
    /// Reads `.env` (if there is one) on top of the process environment.
    pub fn load() -> EnvResult<Self> {
        if let Err(e) = dotenvy::dotenv()
            && !e.not_found()
        {
            return Err(e.into());
        }

        Ok(from_env::<Config>()?)
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// The channel that scheduled announcements are delivered to.
    pub fn announce_channel(&self) -> Option<&str> {
        self.monitored_channels.first().map(String::as_str)
    }

    pub fn is_monitored(&self, channel: &str) -> bool {
        let channel = channel.trim_start_matches('#');
        self.monitored_channels
            .iter()
            .any(|c| c.trim_start_matches('#').eq_ignore_ascii_case(channel))
    }

    pub fn is_power_user(&self, login: &str) -> bool {
        self.power_users.iter().any(|u| u.eq_ignore_ascii_case(login))
    }
}

fn default_database_url() -> String {
    String::from("sqlite://saber-herald.db?mode=rwc")
}

fn default_scoresaber_api_url() -> String {
    String::from("https://scoresaber.com/api")
}

fn default_beatsaver_api_url() -> String {
    String::from("https://api.beatsaver.com")
}

fn default_beatsaver_map_url() -> String {
    String::from("https://beatsaver.com/maps")
}

fn default_irc_server() -> String {
    String::from("irc.chat.twitch.tv")
}

fn default_service_name() -> String {
    String::from(env!("CARGO_PKG_NAME"))
}

#[inline]
const fn default_http_timeout_secs() -> u64 {
    30
}

#[inline]
const fn default_update_interval_secs() -> u64 {
    300
}

#[inline]
const fn default_recent_page_limit() -> u32 {
    5
}

#[inline]
const fn default_full_page_limit() -> u32 {
    100
}

#[inline]
const fn default_irc_port() -> u16 {
    6697
}

#[inline]
const fn default_max_reply_chars() -> usize {
    2000
}

#[inline]
const fn default_api_port() -> u16 {
    3000
}

// ---
//  Deserializer implementation
// ---

struct Val(String, String);
struct Varname(String);

struct Deserializer<'de, Iter: Iterator<Item = (String, String)>> {
    inner: MapDeserializer<'de, Vars<Iter>, EnvDeserializeError>,
}

struct Vars<Iter>
where
    Iter: IntoIterator<Item = (String, String)>,
{
    inner: Iter,
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Val {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<'de> IntoDeserializer<'de, EnvDeserializeError> for Varname {
    type Deserializer = Self;
    fn into_deserializer(self) -> Self::Deserializer {
        self
    }
}

impl<Iter: Iterator<Item = (String, String)>> Iterator for Vars<Iter> {
    type Item = (Varname, Val);

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|(k, v)| (Varname(k.clone()), Val(k, v)))
    }
}

macro_rules! forward_parsed_vals {
    ($($ty:ident => $method:ident,)*) => {
        $(
            fn $method<V>(self, visitor: V) -> Result<V::Value, EnvDeserializeError>
            where
                V: de::Visitor<'de>
            {
                match self.1.trim().parse::<$ty>() {
                    Ok(val) => val.into_deserializer().$method(visitor),
                    Err(e) => Err(de::Error::custom(format_args!(
                        "{}: while parsing '{}' (variable: {})",
                        e, self.1, self.0
                    )))
                }
            }
        )*
    };
}

impl<'de> de::Deserializer<'de> for Val {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.1.into_deserializer().deserialize_any(visitor)
    }

    fn deserialize_seq<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            return SeqDeserializer::new(empty::<Val>()).deserialize_seq(visitor);
        }

        let name = self.0;
        let values = self
            .1
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Val(name.clone(), v.to_owned()))
            .collect::<Vec<_>>();

        SeqDeserializer::new(values.into_iter()).deserialize_seq(visitor)
    }

    fn deserialize_option<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        if self.1.trim().is_empty() {
            visitor.visit_none()
        } else {
            visitor.visit_some(self)
        }
    }

    fn deserialize_newtype_struct<V>(
        self,
        _: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V>(
        self,
        _: &'static str,
        _: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_enum(self.1.into_deserializer())
    }

    forward_parsed_vals! {
        bool => deserialize_bool,
        u8 => deserialize_u8,
        u16 => deserialize_u16,
        u32 => deserialize_u32,
        u64 => deserialize_u64,
        i8 => deserialize_i8,
        i16 => deserialize_i16,
        i32 => deserialize_i32,
        i64 => deserialize_i64,
        f32 => deserialize_f32,
        f64 => deserialize_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string unit bytes byte_buf map
        unit_struct tuple_struct identifier tuple
        ignored_any struct
    }
}

impl<'de> de::Deserializer<'de> for Varname {
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.0.into_deserializer().deserialize_any(visitor)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf map newtype_struct
        unit_struct tuple_struct identifier tuple ignored_any
        bool u8 u16 u32 u64 i8 i16 i32 i64 f32 f64 enum struct
    }
}

impl<'de, Iter: Iterator<Item = (String, String)>> Deserializer<'de, Iter> {
    fn new(vars: Iter) -> Self {
        Deserializer {
            inner: MapDeserializer::new(Vars { inner: vars }),
        }
    }
}

impl<'de, Iter: Iterator<Item = (String, String)>> de::Deserializer<'de>
    for Deserializer<'de, Iter>
{
    type Error = EnvDeserializeError;

    fn deserialize_any<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        self.deserialize_map(visitor)
    }

    fn deserialize_map<V>(self, visitor: V) -> Result<V::Value, Self::Error>
    where
        V: de::Visitor<'de>,
    {
        visitor.visit_map(self.inner)
    }

    serde::forward_to_deserialize_any! {
        char str string unit seq option bytes byte_buf
        newtype_struct unit_struct tuple_struct identifier
        tuple ignored_any bool u8 u16 u32 u64 i8 i16 i32 i64
        f32 f64 enum struct
    }
}

pub fn from_env<T>() -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
{
    from_iter(std::env::vars())
}

pub fn from_iter<Iter, T>(iter: Iter) -> Result<T, EnvDeserializeError>
where
    T: de::DeserializeOwned,
    Iter: IntoIterator<Item = (String, String)>,
{
    T::deserialize(Deserializer::new(iter.into_iter()))
}

impl de::Error for EnvDeserializeError {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        EnvDeserializeError::Custom(msg.to_string())
    }

    fn missing_field(field: &'static str) -> Self {
        EnvDeserializeError::MissingValue(field.to_uppercase())
    }
}

pub type EnvResult<T> = core::result::Result<T, EnvErr>;

#[derive(Debug, Error)]
pub enum EnvErr {
    #[error(transparent)]
    Dotenvy(#[from] dotenvy::Error),

    #[error(transparent)]
    DeserializationError(#[from] EnvDeserializeError),
}

#[derive(Debug, Error)]
pub enum EnvDeserializeError {
    #[error("env deserialization error: {0}")]
    Custom(String),

    #[error("missing required variable {0}")]
    MissingValue(String),
}

//! Compile-time configuration loaded via `toml-cfg` from `cfg.toml`.

#[toml_cfg::toml_config]
pub struct Settings {
    #[default("boombox-ap")]
    pub wifi_ssid: &'static str,
    #[default("")]
    pub wifi_password: &'static str,
    #[default("BOOMBOX")]
    pub bt_device_name: &'static str,
    #[default("/spiffs/playlist.pls")]
    pub playlist_path: &'static str,
    #[default("Radio ROKS")]
    pub default_stream_title: &'static str,
    #[default("http://online.radioroks.ua/RadioROKS")]
    pub default_stream_url: &'static str,
}

/// Build script for dxcore
///
/// 默认配置文件变化时重新构建，保证 `cargo run` 读到的是最新的 config.toml。
fn main() {
    println!("cargo:rerun-if-changed=config.toml");
}

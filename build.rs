fn main() {
    // only the ESP-IDF build exports linker args; host builds skip it
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}

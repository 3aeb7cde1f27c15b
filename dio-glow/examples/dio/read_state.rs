//! Reads the state of a remote DIO line, a bit like the device web tutorial does.
//! Set `DIO_GLOW_BASE_URL` and `DIO_GLOW_PASSWORD` to reach your own device.
use dio_glow::io::HttpDio;

#[tokio::main]
async fn main() {
    let base_url =
        std::env::var("DIO_GLOW_BASE_URL").unwrap_or(String::from("http://192.168.0.100:59801"));
    let password = std::env::var("DIO_GLOW_PASSWORD").unwrap_or_default();

    let dio = HttpDio::new(base_url, password).unwrap();

    // The token is exchanged on the first call.
    for name in ["DIO_A", "DIO_B"] {
        match dio.get_state(name).await {
            Ok(state) => println!("{}", state),
            Err(err) => eprintln!("{} cannot be read: {}", name, err),
        }
    }
}

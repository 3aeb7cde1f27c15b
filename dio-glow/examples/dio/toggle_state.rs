//! Toggles the output line (DIO_A) a few times: the LED should blink.
//! Set `DIO_GLOW_BASE_URL` and `DIO_GLOW_PASSWORD` to reach your own device.
use dio_glow::io::{DioProtocol, HttpDio};
use dio_glow::pause;

#[tokio::main]
async fn main() {
    let base_url =
        std::env::var("DIO_GLOW_BASE_URL").unwrap_or(String::from("http://192.168.0.100:59801"));
    let password = std::env::var("DIO_GLOW_PASSWORD").unwrap_or_default();

    let dio = HttpDio::new(base_url, password).unwrap().with_output("DIO_A");

    for _ in 0..5 {
        dio.write_output(true).await.unwrap();
        pause!(500);
        dio.write_output(false).await.unwrap();
        pause!(500);
    }

    let state = dio.get_state(dio.get_output()).await.unwrap();
    println!("{}", state);
}

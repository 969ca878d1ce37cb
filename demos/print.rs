use futures::StreamExt;

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("emwin_byteblaster", log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    let mut stream = emwin_byteblaster::Stream::new("someone@example.com");
    while let Some(result) = stream.next().await {
        match result {
            Ok(emwin_byteblaster::Event::Product(product)) => {
                println!(
                    "{} ({}):\n    {:.100}",
                    product.filename,
                    product.timestamp,
                    format!("{:?}", product.string_contents())
                );
            }
            Ok(emwin_byteblaster::Event::ServerListUpdated(list)) => {
                log::info!("relay pool now has {} servers", list.primary().len());
            }
            Err(error) => {
                log::error!("error: {}", error)
            }
        }
    }
}

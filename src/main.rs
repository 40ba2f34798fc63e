use clap::{App, Arg};
use imageproc::drawing;
use imageproc::rect::Rect;

use std::error::Error;

use platefind::{Pipeline, PipelineConfig, PlateResult, TesseractCli};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let matches = App::new("platefind")
        .version("0.1.0")
        .about("Locates a Chinese license plate in a photo and validates the OCR result")
        .arg(Arg::with_name("INPUT")
            .help("image file with a license plate")
            .required(true)
            .index(1))
        .arg(Arg::with_name("strategy")
            .long("strategy")
            .takes_value(true)
            .possible_values(&["contour", "ocr-lines", "full-frame"])
            .default_value("contour")
            .help("plate localization strategy"))
        .arg(Arg::with_name("lang")
            .long("lang")
            .takes_value(true)
            .default_value("chi_sim")
            .help("tesseract language pack"))
        .arg(Arg::with_name("tesseract-cmd")
            .long("tesseract-cmd")
            .takes_value(true)
            .default_value("tesseract")
            .help("tesseract executable to invoke"))
        .arg(Arg::with_name("preview")
            .long("preview")
            .takes_value(true)
            .value_name("FILE")
            .help("save a copy of the input with the recognized region outlined"))
        .get_matches();

    let input = matches.value_of("INPUT").ok_or("image is required")?;
    let config = match matches.value_of("strategy") {
        Some("ocr-lines") => PipelineConfig::ocr_lines(),
        Some("full-frame") => PipelineConfig::full_frame_otsu(),
        _ => PipelineConfig::contour(),
    };
    let engine = TesseractCli::new()
        .with_command(matches.value_of("tesseract-cmd").unwrap_or("tesseract"))
        .with_lang(matches.value_of("lang").unwrap_or("chi_sim"));
    let pipeline = Pipeline::with_config(engine, config);

    let image = image::open(input)?;
    match pipeline.recognize(&image) {
        PlateResult::Recognized { plate, region, confidence } => {
            println!("plate: {} (confidence {:.2})", plate, confidence);
            if let Some(out) = matches.value_of("preview") {
                let mut preview = image.to_rgb8();
                let rect = Rect::at(region.x as i32, region.y as i32)
                    .of_size(region.width, region.height);
                drawing::draw_hollow_rect_mut(&mut preview, rect, image::Rgb([255, 0, 0]));
                preview.save(out)?;
            }
        }
        PlateResult::NotFound { reason, raw_texts } => {
            println!("{}", reason);
            for text in &raw_texts {
                println!("  ocr: {}", text);
            }
        }
    }

    Ok(())
}

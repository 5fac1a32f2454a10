extern crate cadastre_shapefile;
extern crate env_logger;

use std::env;
use std::io;
use std::io::Write;
use std::path::PathBuf;
use std::process;
use cadastre_shapefile::shapefile::{OpenOptions, TextCodec};
use cadastre_shapefile::shapefile::shp::to_pyeong;

fn main() {
    env_logger::init();

    let mut args = env::args();

    if args.len() < 2 || args.len() > 3 {
        writeln!(&mut io::stderr(), "Usage: {} <SHP_PATH> [CODE_PAGE]", args.next().unwrap()).unwrap();
        process::exit(1);
    }

    args.next();
    let path = PathBuf::from(args.next().unwrap());

    let mut options = OpenOptions::new();
    if let Some(label) = args.next() {
        match TextCodec::from_label(&label) {
            Some(codec) => options = options.codec(codec),
            None => {
                writeln!(&mut io::stderr(), "Unknown code page: {}", label).unwrap();
                process::exit(1);
            }
        }
    }

    match options.open(&path) {
        Err(err) => {
            writeln!(&mut io::stderr(), "{}", err).unwrap();
            process::exit(1);
        }
        Ok(set) => {
            let fields: Vec<String> = set.dbf().fields().iter().map(|f| f.to_string()).collect();
            println!("{} {:?} [{}]", set.codec().label(), set.shp().shape_type(), fields.join(", "));

            let mut n_records: usize = 0;

            for (record, geometry) in set.records() {
                n_records += 1;
                let values: Vec<&str> = record.values().iter().map(|v| v.as_str()).collect();
                match geometry.area() {
                    Ok(area) => println!("{}\t{}\t{:.2}m²\t{:.2}평", record.index(), values.join("|"), area, to_pyeong(area)),
                    Err(_) => println!("{}\t{}", record.index(), values.join("|")),
                }
            }

            for warning in set.dbf().warnings() {
                writeln!(&mut io::stderr(), "Undecodable text: {}", warning).unwrap();
            }

            println!("Read {} records", n_records);
        }
    }
}

pub mod ini_parser;

pub mod sale_writer;

//! Unit test modules.

mod storage_test;
mod tcx_export_test;
mod workout_engine_test;
mod workout_parser_test;

pub mod sync_run;

pub mod round_ender;

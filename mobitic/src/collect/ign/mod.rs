pub mod ign_collect;

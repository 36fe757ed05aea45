mod properties;
mod references;

mod objects;

pub use objects::{
    AbortMultipartUploadRequest, CompleteMultipartUploadRequest, CreateMultipartUploadRequest,
    GetObjectRequest, HeadObjectRequest, ObjectsService, PutObjectRequest, UploadPartRequest,
};
